use fmcadc::{
    cli::{AcqArgs, ConfigSet},
    command::{self, Command},
    cycle::{self, Coordinator, CycleOptions, ShotOutcome, Wakeup},
    output::{Shot, ShotSink, SingleFileSink},
    utils::Counter,
    Conf, ConfField, ConfType, Device, DeviceLocation, Error, SimulatedBoard, ZioControl,
    ZIO_CONTROL_SIZE,
};
use std::{io::Write, sync::Arc, thread, time::Duration};

#[derive(Default)]
struct Recorder {
    seq: Vec<u32>,
    loops: u32,
    on_shot: Option<SimulatedBoard>,
}

impl ShotSink for Recorder {
    fn write_shot(&mut self, shot: &Shot) -> anyhow::Result<()> {
        self.seq.push(shot.buf.metadata().map_or(u32::MAX, |m| m.seq_num));
        if let Some(board) = &self.on_shot {
            board.disable_trigger();
        }
        Ok(())
    }

    fn end_loop(&mut self) -> anyhow::Result<()> {
        self.loops += 1;
        Ok(())
    }
}

fn configured(board: &SimulatedBoard, nshots: u32, pre: u32, post: u32) -> Device {
    let dev = board.device();
    let mut conf = Conf::new(ConfType::Acquisition);
    conf.set(ConfField::AcqNShots, nshots);
    conf.set(ConfField::AcqPreSamp, pre);
    conf.set(ConfField::AcqPostSamp, post);
    dev.apply_config(&conf).unwrap();
    dev
}

#[test]
fn opening_a_missing_board_fails() {
    let dir = tempfile::tempdir().unwrap();
    let location = DeviceLocation {
        sys_root: dir.path().to_path_buf(),
        dev_root: dir.path().to_path_buf(),
    };
    let err = Device::open_by_lun("fmc-adc-100m14b4cha", 0x7, &location).unwrap_err();
    assert!(matches!(err, Error::NoDevice(_)), "got {err}");

    let err = Device::open_by_name("fmc-adc-250m", 0x7, &location).unwrap_err();
    assert!(matches!(err, Error::Adc(fmcadc::ErrorCode::NotSupported)));
}

#[test]
fn empty_record_writes_nothing() {
    let board = SimulatedBoard::new(0x200);
    let dev = board.device();

    let err = dev.apply_config(&Conf::new(ConfType::Trigger)).unwrap_err();
    assert!(err.is_no_mask());
    assert_eq!(board.attr("cset0/trigger/external").as_deref(), Some("1"));
}

#[test]
fn zero_timeout_poll_is_retryable() {
    let board = SimulatedBoard::new(0x200);
    let dev = board.device();

    let err = dev.poll(Some(Duration::ZERO)).unwrap_err();
    assert!(err.is_retryable());
    assert!(!err.is_disabled());
}

#[test]
fn applied_values_read_back() {
    let board = SimulatedBoard::new(0x200);
    let dev = board.device();

    let mut trg = Conf::new(ConfType::Trigger);
    trg.set(ConfField::TrgThreshold, -50i32 as u32);
    trg.set(ConfField::TrgDelay, 12);
    dev.apply_config(&trg).unwrap();

    let mut chan = Conf::routed(ConfType::Channel, 2);
    chan.set(ConfField::ChnOffset, -500i32 as u32);
    chan.set(ConfField::ChnRange, 0x45);
    dev.apply_config(&chan).unwrap();
    assert_eq!(board.attr("cset0/ch2-offset").as_deref(), Some("-500"));

    let mut back = Conf::new(ConfType::Trigger);
    back.request(ConfField::TrgThreshold);
    back.request(ConfField::TrgDelay);
    dev.retrieve_config(&mut back).unwrap();
    assert_eq!(back.get(ConfField::TrgThreshold).map(|v| v as i32), Some(-50));
    assert_eq!(back.get(ConfField::TrgDelay), Some(12));

    let mut back = Conf::routed(ConfType::Channel, 2);
    back.request(ConfField::ChnOffset);
    back.request(ConfField::ChnRange);
    dev.retrieve_config(&mut back).unwrap();
    assert_eq!(back.get(ConfField::ChnOffset).map(|v| v as i32), Some(-500));
    assert_eq!(back.get(ConfField::ChnRange), Some(0x45));

    let mut acq = Conf::new(ConfType::Acquisition);
    acq.request(ConfField::AcqFreqHz);
    acq.request(ConfField::AcqNBits);
    dev.retrieve_config(&mut acq).unwrap();
    assert_eq!(acq.get(ConfField::AcqFreqHz), Some(100_000_000));
    assert_eq!(acq.get(ConfField::AcqNBits), Some(14));
}

#[test]
fn bad_records_are_rejected_before_writing() {
    let board = SimulatedBoard::new(0x200);
    let dev = board.device();

    let mut chan = Conf::routed(ConfType::Channel, 4);
    chan.set(ConfField::ChnRange, 0x23);
    let err = dev.apply_config(&chan).unwrap_err();
    assert!(matches!(err, Error::Adc(fmcadc::ErrorCode::NoChannel)));

    let mut trg = Conf::new(ConfType::Trigger);
    trg.set(ConfField::TrgDelay, 3);
    trg.set(ConfField::AcqNShots, 3);
    let err = dev.apply_config(&trg).unwrap_err();
    assert!(matches!(err, Error::Adc(fmcadc::ErrorCode::NoCapability)));
    assert_eq!(board.attr("cset0/trigger/delay").as_deref(), Some("0"));

    let mut acq = Conf::new(ConfType::Acquisition);
    acq.set(ConfField::AcqPostSamp, 10);
    acq.set(ConfField::AcqFreqHz, 1);
    let err = dev.apply_config(&acq).unwrap_err();
    assert!(matches!(err, Error::Adc(fmcadc::ErrorCode::NoSet)));
    assert_eq!(board.attr("cset0/trigger/post-samples").as_deref(), Some("16"));
}

#[test]
fn disabled_trigger_ends_the_shot_loop() {
    let board = SimulatedBoard::new(0x200);
    board.set_auto_trigger(false);
    let dev = configured(&board, 3, 0, 16);

    dev.start(false, Some(Duration::ZERO)).unwrap();
    board.fire();

    let mut buf = dev.request_buffer(16);
    let mut sink = Recorder {
        on_shot: Some(board.clone()),
        ..Default::default()
    };
    let mut counter = Counter::new();
    let outcome = cycle::run_shots(
        &dev,
        &mut buf,
        3,
        0,
        Some(Duration::from_secs(5)),
        &mut sink,
        &mut counter,
    )
    .unwrap();

    assert_eq!(outcome, ShotOutcome::Disabled { done: 1 });
    assert_eq!(sink.seq, vec![0]);
    assert_eq!(counter.n_shots, 1);
    assert_eq!(counter.total_size, 16 * 4 * 2);
    assert!(counter.rate() > 0.0);
}

#[test]
fn missing_shots_time_out() {
    let board = SimulatedBoard::new(0x200);
    board.set_auto_trigger(false);
    let dev = configured(&board, 2, 0, 16);
    dev.start(false, Some(Duration::ZERO)).unwrap();
    board.fire();

    let mut buf = dev.request_buffer(16);
    let mut sink = Recorder::default();
    let outcome = cycle::run_shots(
        &dev,
        &mut buf,
        2,
        0,
        Some(Duration::from_millis(20)),
        &mut sink,
        &mut Counter::new(),
    )
    .unwrap();
    assert_eq!(outcome, ShotOutcome::TimedOut { done: 1 });
}

#[test]
fn single_file_holds_control_then_payload_per_shot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shots.bin");

    let board = SimulatedBoard::new(0x200);
    let dev = configured(&board, 2, 2, 8);
    dev.start(false, Some(Duration::ZERO)).unwrap();

    let mut buf = dev.request_buffer(10);
    let mut sink = SingleFileSink::create(&path).unwrap();
    let outcome = cycle::run_shots(
        &dev,
        &mut buf,
        2,
        2,
        Some(Duration::from_secs(5)),
        &mut sink,
        &mut Counter::new(),
    )
    .unwrap();
    assert_eq!(outcome, ShotOutcome::Completed(2));
    sink.end_loop().unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let payload = 10 * 4 * 2;
    assert_eq!(bytes.len(), 2 * (ZIO_CONTROL_SIZE + payload));

    for (i, record) in bytes.chunks(ZIO_CONTROL_SIZE + payload).enumerate() {
        let raw: [u8; ZIO_CONTROL_SIZE] = record[..ZIO_CONTROL_SIZE].try_into().unwrap();
        let ctrl = ZioControl::decode(&raw);
        assert_eq!(ctrl.seq_num, i as u32);
        assert_eq!(ctrl.nsamples, 40);
        assert_eq!(ctrl.payload_len(), payload);
    }
}

fn startup_config(dev: &Device, args: &AcqArgs) -> ConfigSet {
    let mut cfg = ConfigSet::retrieve_request();
    for conf in cfg.records_mut() {
        dev.retrieve_config(conf).unwrap();
    }
    args.apply_startup(&mut cfg);
    cfg
}

#[test]
fn cycle_runs_every_loop() {
    let board = SimulatedBoard::new(0x200);
    let dev = Arc::new(board.device());
    let coord = Arc::new(Coordinator::new());
    cycle::spawn_poll_waiter(Arc::clone(&dev), Arc::clone(&coord), Duration::from_millis(10))
        .unwrap();

    let args = AcqArgs {
        nshots: Some(2),
        after: Some(32),
        ..Default::default()
    };
    let mut cfg = startup_config(&dev, &args);
    let mut sink = Recorder::default();
    let opts = CycleOptions {
        loops: 3,
        timeout: Some(Duration::from_secs(5)),
    };

    let last = cycle::run(&dev, &coord, &mut cfg, &mut sink, &opts).unwrap();

    assert_eq!(sink.loops, 3);
    assert_eq!(sink.seq, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(board.commands(), vec![2, 1, 1, 1, 2]);
    assert_eq!(board.attr("cset0/trigger/external").as_deref(), Some("1"));
    assert_eq!(board.attr("cset0/ch0-vref").as_deref(), Some("17"));

    let buf = last.unwrap();
    assert_eq!(buf.nsamples, 32);
    assert_eq!(buf.waveform().dim(), (32, 4));
}

#[test]
fn queued_update_reconfigures_before_reading() {
    let board = SimulatedBoard::new(0x200);
    let dev = Arc::new(board.device());
    let coord = Arc::new(Coordinator::new());
    cycle::spawn_poll_waiter(Arc::clone(&dev), Arc::clone(&coord), Duration::from_millis(10))
        .unwrap();

    let mut cfg = startup_config(&dev, &AcqArgs {
        nshots: Some(2),
        ..Default::default()
    });
    coord.post(command::parse_line("-n 1 --after 8").unwrap());

    let mut sink = Recorder::default();
    let opts = CycleOptions {
        loops: 1,
        timeout: Some(Duration::from_secs(5)),
    };
    let last = cycle::run(&dev, &coord, &mut cfg, &mut sink, &opts).unwrap();

    assert_eq!(board.commands(), vec![2, 1, 2, 1, 2]);
    assert_eq!(board.attr("cset0/trigger/nshots").as_deref(), Some("1"));
    // blocks of the first start were flushed
    assert_eq!(sink.seq, vec![2]);
    assert_eq!(last.unwrap().nsamples, 8);
}

#[test]
fn threshold_update_keeps_the_falling_edge() {
    let board = SimulatedBoard::new(0x200);
    let dev = Arc::new(board.device());
    let coord = Arc::new(Coordinator::new());
    cycle::spawn_poll_waiter(Arc::clone(&dev), Arc::clone(&coord), Duration::from_millis(10))
        .unwrap();

    let args = AcqArgs {
        nshots: Some(1),
        negative_edge: true,
        ..Default::default()
    };
    let mut cfg = startup_config(&dev, &args);
    coord.post(command::parse_line("-t 100").unwrap());

    let mut sink = Recorder::default();
    let opts = CycleOptions {
        loops: 1,
        timeout: Some(Duration::from_secs(5)),
    };
    cycle::run(&dev, &coord, &mut cfg, &mut sink, &opts).unwrap();

    assert_eq!(board.commands(), vec![2, 1, 2, 1, 2]);
    assert_eq!(board.attr("cset0/trigger/int-threshold").as_deref(), Some("100"));
    assert_eq!(board.attr("cset0/trigger/polarity").as_deref(), Some("1"));
}

#[test]
fn config_only_never_starts() {
    let board = SimulatedBoard::new(0x200);
    let dev = Arc::new(board.device());
    let coord = Arc::new(Coordinator::new());
    cycle::spawn_poll_waiter(Arc::clone(&dev), Arc::clone(&coord), Duration::from_millis(10))
        .unwrap();

    let args = AcqArgs {
        delay: Some(40),
        ..Default::default()
    };
    let mut cfg = startup_config(&dev, &args);
    let mut sink = fmcadc::output::ConfigOnly;
    let opts = CycleOptions {
        loops: 1,
        timeout: None,
    };
    assert!(cycle::run(&dev, &coord, &mut cfg, &mut sink, &opts)
        .unwrap()
        .is_none());
    assert_eq!(board.commands(), vec![2]);
    assert_eq!(board.attr("cset0/trigger/delay").as_deref(), Some("40"));
}

#[test]
fn fifo_lines_reach_the_coordinator() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("adcfifo");
    let coord = Arc::new(Coordinator::new());
    command::spawn_fifo_listener(path.clone(), Arc::clone(&coord), Duration::from_millis(50))
        .unwrap();

    let writer = thread::spawn(move || {
        let mut fifo = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        fifo.write_all(b"--bogus\n-c 2 -t 300\n").unwrap();
    });

    assert_eq!(coord.wait_event(), Wakeup::Reconfigure);
    writer.join().unwrap();

    let commands = coord.take_commands();
    assert_eq!(commands.len(), 1);
    match &commands[0] {
        Command::ReconfigureTrigger(conf) => {
            assert_eq!(conf.get(ConfField::TrgSourceChan), Some(1));
            assert_eq!(conf.get(ConfField::TrgThreshold), Some(300));
        }
        other => panic!("unexpected {other:?}"),
    }
}
