use std::{
    fs::File,
    io::{self, Read},
    os::fd::AsRawFd,
    path::Path,
    time::Duration,
};

/// One of the two character devices of a channel set.
pub trait DeviceStream: Send + Sync {
    /// Wait until the stream has something to read. `None` waits forever.
    /// Returns `false` when the timeout elapsed first.
    fn wait_readable(&self, timeout: Option<Duration>) -> io::Result<bool>;

    /// Read what is available into `buf`; `Ok(0)` means end of stream.
    fn read_some(&self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Fill `buf` completely; reports how many bytes arrived before end of stream.
pub fn read_full(stream: &dyn DeviceStream, buf: &mut [u8]) -> io::Result<usize> {
    let mut done = 0;
    while done < buf.len() {
        match stream.read_some(&mut buf[done..]) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(done)
}

/// A ZIO character device opened read-only.
#[derive(Debug)]
pub struct CharDevice {
    file: File,
}

impl CharDevice {
    pub fn open(path: &Path) -> io::Result<Self> {
        File::open(path).map(Self::from_file)
    }

    pub fn from_file(file: File) -> Self {
        Self { file }
    }
}

fn poll_timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(t) => {
            // round up so a sub-millisecond wait is not turned into a zero poll
            let ms = t.as_micros().div_ceil(1000);
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

impl DeviceStream for CharDevice {
    fn wait_readable(&self, timeout: Option<Duration>) -> io::Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        loop {
            let ret = unsafe { libc::poll(&mut pfd, 1, poll_timeout_ms(timeout)) };
            match ret {
                0 => return Ok(false),
                n if n > 0 => return Ok(true),
                _ => {
                    let err = io::Error::last_os_error();
                    if err.kind() != io::ErrorKind::Interrupted {
                        return Err(err);
                    }
                }
            }
        }
    }

    fn read_some(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.file).read(buf)
    }
}
