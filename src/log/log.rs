// SPDX-License-Identifier: GPL-2.0-or-later

use common::{ILogger, LogEntry, LogLevel, LogSource};
use serde::Serialize;
use std::{
    fmt,
    ops::Deref,
    time::{SystemTime, UNIX_EPOCH},
};

use tokio::sync::broadcast;

/// Logger used everywhere across the engine. Broadcasts every entry to
/// whoever is subscribed; printing to stdout never blocks on a slow
/// subscriber since the channel just drops old entries for them.
pub struct Logger {
    feed: broadcast::Sender<LogEntryWithTime>,
    min_level: LogLevel,
}

impl Logger {
    #[must_use]
    pub fn new(min_level: LogLevel) -> Self {
        let (feed, _) = broadcast::channel(256);
        Self { feed, min_level }
    }

    /// Subscribes to the log feed and returns a channel that receives all log entries.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntryWithTime> {
        self.feed.subscribe()
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

impl ILogger for Logger {
    /// Sends log entry to all subscribers. The timestamp is applied now.
    fn log(&self, log: LogEntry) {
        if log.level > self.min_level {
            return;
        }
        let log = LogEntryWithTime {
            level: log.level,
            source: log.source,
            message: log.message.to_string(),
            time: UnixMicro::now(),
        };

        println!("{log}");
        self.feed.send(log).ok();
    }
}

/// Microseconds since the `UNIX_EPOCH`.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct UnixMicro(u64);

impl UnixMicro {
    /// Current time as `UnixMicro`.
    #[must_use]
    pub fn now() -> Self {
        UnixMicro(
            u64::try_from(
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .expect("broken system clock")
                    .as_micros(),
            )
            .expect("really broken system clock"),
        )
    }
}

impl From<u64> for UnixMicro {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl Deref for UnixMicro {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Log entry with time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LogEntryWithTime {
    pub level: LogLevel,
    pub source: LogSource,
    pub message: String,
    pub time: UnixMicro,
}

impl fmt::Display for LogEntryWithTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            LogLevel::Error => write!(f, "[ERROR] ")?,
            LogLevel::Warning => write!(f, "[WARNING] ")?,
            LogLevel::Info => write!(f, "[INFO] ")?,
            LogLevel::Debug => write!(f, "[DEBUG] ")?,
        };

        let mut src_title = self.source.to_string();
        make_ascii_titlecase(&mut src_title);

        write!(f, "{}: {}", src_title, self.message)
    }
}

/// Make the first character in a string uppercase.
fn make_ascii_titlecase(s: &mut str) {
    if let Some(r) = s.get_mut(0..1) {
        r.make_ascii_uppercase();
    }
}

#[allow(clippy::needless_pass_by_value)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn logger_messages() {
        let logger = Logger::new(LogLevel::Debug);
        let mut feed = logger.subscribe();

        logger.log(LogEntry::new(LogLevel::Info, "s1", "1".to_owned()));
        logger.log(LogEntry::new(LogLevel::Warning, "s2", "2".to_owned()));

        let mut actual = vec![feed.recv().await.unwrap(), feed.recv().await.unwrap()];
        actual.iter_mut().for_each(|v| v.time = UnixMicro(0));

        assert_eq!(actual[0].message, "1");
        assert_eq!(actual[1].level, LogLevel::Warning);
    }

    #[tokio::test]
    async fn logger_filters_below_min_level() {
        let logger = Logger::new(LogLevel::Warning);
        let mut feed = logger.subscribe();

        logger.log(LogEntry::new(LogLevel::Debug, "s1", "hidden".to_owned()));
        logger.log(LogEntry::new(LogLevel::Error, "s1", "shown".to_owned()));

        let entry = feed.recv().await.unwrap();
        assert_eq!(entry.message, "shown");
    }
}
