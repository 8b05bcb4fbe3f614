use anyhow::{bail, Context, Result};
use clap::Parser;
use fmcadc::{
    cli::{Cli, ConfigSet},
    command,
    cycle::{self, Coordinator, CycleOptions},
    output, params,
    settings::Settings,
    Device, SimulatedBoard, BOARD_NAME,
};
use log::{info, warn, LevelFilter};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};
use std::{fs::File, sync::Arc};

fn init_logging(settings: &Settings) -> Result<()> {
    let config = ConfigBuilder::new()
        .set_thread_level(LevelFilter::Debug)
        .set_time_format_rfc3339()
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        settings.log_level(),
        config.clone(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];
    if let Some(path) = &settings.run.log_file {
        let file = File::create(path).with_context(|| format!("{}", path.display()))?;
        loggers.push(WriteLogger::new(LevelFilter::Debug, config, file));
    }
    CombinedLogger::init(loggers).context("cannot set up logging")
}

fn open_device(cli: &Cli, settings: &Settings) -> Result<Device> {
    if cli.simulate {
        info!("using a simulated board");
        return Ok(SimulatedBoard::new(cli.lun).device());
    }
    Device::open_by_lun(BOARD_NAME, cli.lun, &settings.location())
        .with_context(|| format!("cannot open {BOARD_NAME} LUN {:#x}", cli.lun))
}

fn plot(cli: &Cli, settings: &Settings, cfg: &ConfigSet, buf: &fmcadc::Buffer) -> Result<()> {
    let Some(channel) = cli.graph else {
        return Ok(());
    };
    let bit_scale = cfg.input_range().bit_scale().unwrap_or_else(|| {
        warn!("unknown input range, plotting raw counts");
        1.0
    });
    let path = output::write_plot(&settings.paths.plot_dir, cli.lun, buf, channel, bit_scale)?;
    output::run_gnuplot(&path, cli.x11)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("cannot load settings")?;
    init_logging(&settings)?;

    let dev = open_device(&cli, &settings)?;
    if dev.driver_type() != "zio" {
        bail!("unsupported driver type {}", dev.driver_type());
    }

    let mut cfg = ConfigSet::retrieve_request();
    for conf in cfg.records_mut() {
        dev.retrieve_config(conf)
            .with_context(|| format!("cannot get {} configuration", conf.kind.name()))?;
    }
    cli.acq.apply_startup(&mut cfg);
    params::log_all(&dev);

    let mut sink = output::open_sink(&cli.output_mode())?;
    let dev = Arc::new(dev);
    let coord = Arc::new(Coordinator::new());

    if sink.wants_data() {
        command::spawn_fifo_listener(
            settings.paths.fifo.clone(),
            Arc::clone(&coord),
            settings.fifo_retry(),
        )
            .with_context(|| format!("cannot listen on {}", settings.paths.fifo.display()))?;
    }
    cycle::spawn_poll_waiter(Arc::clone(&dev), Arc::clone(&coord), settings.poll_slice())
        .context("cannot start the poll thread")?;

    let opts = CycleOptions {
        loops: cli.loops,
        timeout: cli.timeout(),
    };
    let last = cycle::run(&dev, &coord, &mut cfg, &mut *sink, &opts)?;

    if let Some(buf) = &last {
        plot(&cli, &settings, &cfg, buf)?;
    }

    // the worker threads still hold the device; process exit closes it
    info!("done");
    Ok(())
}
