use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, LevelFilter, SharedLogger, TermLogger,
    TerminalMode, WriteLogger,
};
use updraft_platform::AppPaths;

/// Append-only log for a process that may run for days under `watch`.
///
/// The file is reopened when something deletes it and trimmed in place once
/// it grows past `max_size`. A `max_size` of zero never trims.
struct LogFile {
    path: PathBuf,
    max_size: u64,
    file: Option<File>,
    written: u64,
}

impl LogFile {
    fn open(path: PathBuf, max_size: u64) -> io::Result<Self> {
        let mut log = Self {
            path,
            max_size,
            file: None,
            written: 0,
        };
        log.reopen()?;
        Ok(log)
    }

    fn reopen(&mut self) -> io::Result<()> {
        self.file = None;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        trim_to_recent_half(&self.path, self.max_size);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.written = file.metadata().map_or(0, |metadata| metadata.len());
        self.file = Some(file);
        Ok(())
    }

    fn needs_reopen(&self) -> bool {
        self.file.is_none()
            || (self.max_size > 0 && self.written > self.max_size)
            || !self.path.exists()
    }
}

impl Write for LogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.needs_reopen() {
            self.reopen()?;
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("log file not open"))?;
        let written = file.write(buf)?;
        self.written += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.as_mut().map_or(Ok(()), File::flush)
    }
}

/// Drop the older half of an oversized log, cut at a line boundary.
fn trim_to_recent_half(path: &Path, max_size: u64) {
    if max_size == 0 {
        return;
    }
    match std::fs::metadata(path) {
        Ok(metadata) if metadata.len() > max_size => {}
        _ => return,
    }
    let Ok(contents) = std::fs::read(path) else {
        return;
    };

    let half = contents.len() / 2;
    let keep_from = contents[half..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(half, |pos| half + pos + 1);
    let _ = std::fs::write(path, &contents[keep_from..]);
}

fn log_config() -> Config {
    ConfigBuilder::new()
        .set_time_format_rfc3339()
        .add_filter_allow_str("updraft")
        .build()
}

/// Log to `<data_dir>/updraft.log`. Debug builds and `debug` runs also echo
/// to stderr; stdout is reserved for command output.
pub fn init_logging(paths: &AppPaths, debug: bool, max_log_size: u64) {
    let log_path = paths.log_file();
    let config = log_config();
    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();

    if cfg!(debug_assertions) || debug {
        loggers.push(TermLogger::new(
            LevelFilter::Debug,
            config.clone(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        ));
    }
    match LogFile::open(log_path.clone(), max_log_size) {
        Ok(file) => loggers.push(WriteLogger::new(LevelFilter::Debug, config, file)),
        Err(error) => eprintln!("warning: cannot write {}: {error}", log_path.display()),
    }

    let _ = CombinedLogger::init(loggers);
    log::set_max_level(level_for(debug));
    log::debug!("Logging to {}", log_path.display());
}

fn level_for(debug: bool) -> LevelFilter {
    if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}
