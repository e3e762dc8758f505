//! Process-wide logging for the validation core.
//!
//! Lines are tagged with the emitting module and, for noisy subsystems, a
//! [`Category`] that has to be switched on before its debug output appears.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Level {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Error,
            2 => Self::Warn,
            3 => Self::Info,
            4 => Self::Debug,
            _ => Self::Trace,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Format {
    Text = 0,
    Json = 1,
}

impl Format {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Debug categories. Messages logged through [`log_category!`] are dropped
/// unless their category is enabled, independent of the level filter.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Category {
    Validation,
    Mempool,
    Hive,
    Pow,
    Coins,
    CheckQueue,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Validation,
        Category::Mempool,
        Category::Hive,
        Category::Pow,
        Category::Coins,
        Category::CheckQueue,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Validation => "validation",
            Category::Mempool => "mempool",
            Category::Hive => "hive",
            Category::Pow => "pow",
            Category::Coins => "coins",
            Category::CheckQueue => "checkqueue",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|category| category.as_str() == raw)
    }

    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LogConfig {
    pub level: Level,
    pub format: Format,
    pub timestamps: bool,
    pub categories: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: Format::Text,
            timestamps: true,
            categories: 0,
        }
    }
}

impl LogConfig {
    pub fn with_category(mut self, category: Category) -> Self {
        self.categories |= category.bit();
        self
    }

    /// Parses a comma separated category list such as `hive,mempool` or `all`.
    pub fn with_category_list(mut self, raw: &str) -> Result<Self, String> {
        for item in raw.split(',').map(str::trim).filter(|item| !item.is_empty()) {
            if item.eq_ignore_ascii_case("all") {
                for category in Category::ALL {
                    self.categories |= category.bit();
                }
                continue;
            }
            let category =
                Category::parse(item).ok_or_else(|| format!("unknown log category {item}"))?;
            self.categories |= category.bit();
        }
        Ok(self)
    }
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static LOG_FORMAT: AtomicU8 = AtomicU8::new(Format::Text as u8);
static LOG_TIMESTAMPS: AtomicBool = AtomicBool::new(true);
static LOG_CATEGORIES: AtomicU32 = AtomicU32::new(0);
static LOG_STDERR_ENABLED: AtomicBool = AtomicBool::new(true);

#[derive(Clone, Debug)]
pub struct CapturedLog {
    pub ts_ms: u64,
    pub level: Level,
    pub category: Option<Category>,
    pub target: &'static str,
    pub msg: String,
}

static LOG_CAPTURE_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_CAPTURE_CAPACITY: AtomicUsize = AtomicUsize::new(0);
static LOG_CAPTURE: OnceLock<Mutex<VecDeque<CapturedLog>>> = OnceLock::new();

pub fn init(config: LogConfig) {
    LOG_LEVEL.store(config.level as u8, Ordering::Relaxed);
    LOG_FORMAT.store(config.format as u8, Ordering::Relaxed);
    LOG_TIMESTAMPS.store(config.timestamps, Ordering::Relaxed);
    LOG_CATEGORIES.store(config.categories, Ordering::Relaxed);
}

pub fn current_level() -> Level {
    Level::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

pub fn enable_capture(capacity: usize) {
    if capacity == 0 {
        LOG_CAPTURE_ENABLED.store(false, Ordering::Relaxed);
        return;
    }
    LOG_CAPTURE_CAPACITY.store(capacity, Ordering::Relaxed);
    LOG_CAPTURE.get_or_init(|| Mutex::new(VecDeque::with_capacity(capacity.min(1024))));
    LOG_CAPTURE_ENABLED.store(true, Ordering::Relaxed);
}

pub fn set_stderr_enabled(enabled: bool) {
    LOG_STDERR_ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn captured(limit: usize) -> Vec<CapturedLog> {
    let Some(buf) = LOG_CAPTURE.get() else {
        return Vec::new();
    };
    let Ok(guard) = buf.lock() else {
        return Vec::new();
    };
    let start = guard.len().saturating_sub(limit);
    guard.iter().skip(start).cloned().collect()
}

pub fn enabled(level: Level) -> bool {
    level as u8 <= LOG_LEVEL.load(Ordering::Relaxed)
}

pub fn category_enabled(category: Category) -> bool {
    LOG_CATEGORIES.load(Ordering::Relaxed) & category.bit() != 0
}

pub fn log(
    level: Level,
    category: Option<Category>,
    target: &'static str,
    args: fmt::Arguments<'_>,
) {
    if !enabled(level) {
        return;
    }
    if let Some(category) = category {
        if !category_enabled(category) {
            return;
        }
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let ts_ms: u64 = now.as_millis().try_into().unwrap_or(u64::MAX);
    let msg = args.to_string();
    let json_format = LOG_FORMAT.load(Ordering::Relaxed) == Format::Json as u8;

    if LOG_STDERR_ENABLED.load(Ordering::Relaxed) {
        let mut out = io::stderr().lock();
        if json_format {
            let line = json!({
                "ts_ms": ts_ms,
                "level": level.as_str(),
                "category": category.map(Category::as_str),
                "target": target,
                "msg": msg,
            });
            let _ = writeln!(out, "{line}");
        } else {
            if LOG_TIMESTAMPS.load(Ordering::Relaxed) {
                let _ = write!(out, "{} ", UtcTime::from_millis(ts_ms));
            }
            match category {
                Some(category) => {
                    let _ = write!(out, "{} [{}] {}: ", level.as_str(), category.as_str(), target);
                }
                None => {
                    let _ = write!(out, "{} {}: ", level.as_str(), target);
                }
            }
            let _ = writeln!(out, "{msg}");
        }
    }

    if LOG_CAPTURE_ENABLED.load(Ordering::Relaxed) {
        let Some(buf) = LOG_CAPTURE.get() else {
            return;
        };
        let Ok(mut guard) = buf.lock() else {
            return;
        };
        let cap = LOG_CAPTURE_CAPACITY.load(Ordering::Relaxed);
        guard.push_back(CapturedLog {
            ts_ms,
            level,
            category,
            target,
            msg,
        });
        while guard.len() > cap {
            guard.pop_front();
        }
    }
}

#[macro_export]
macro_rules! log_at {
    ($level:expr, $($arg:tt)*) => {{
        if $crate::enabled($level) {
            $crate::log($level, None, module_path!(), format_args!($($arg)*));
        }
    }};
}

/// Debug-level line gated on a [`Category`](crate::Category).
#[macro_export]
macro_rules! log_category {
    ($category:expr, $($arg:tt)*) => {{
        if $crate::enabled($crate::Level::Debug) && $crate::category_enabled($category) {
            $crate::log(
                $crate::Level::Debug,
                Some($category),
                module_path!(),
                format_args!($($arg)*),
            );
        }
    }};
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Error, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Warn, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Info, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Debug, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Trace, $($arg)*);
    }};
}

struct UtcTime {
    secs: u64,
    millis: u64,
}

impl UtcTime {
    fn from_millis(ts_ms: u64) -> Self {
        Self {
            secs: ts_ms / 1000,
            millis: ts_ms % 1000,
        }
    }
}

impl fmt::Display for UtcTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let days = (self.secs / 86_400) as i64;
        let rem = self.secs % 86_400;
        let (year, month, day) = date_from_epoch_days(days);
        write!(
            f,
            "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{:03}Z",
            rem / 3600,
            (rem % 3600) / 60,
            rem % 60,
            self.millis
        )
    }
}

// Proleptic Gregorian date for a day count since 1970-01-01.
fn date_from_epoch_days(days: i64) -> (i64, u32, u32) {
    let shifted = days + 719_468;
    let era = shifted.div_euclid(146_097);
    let day_of_era = shifted.rem_euclid(146_097);
    let year_of_era =
        (day_of_era - day_of_era / 1460 + day_of_era / 36_524 - day_of_era / 146_096) / 365;
    let day_of_year = day_of_era - (365 * year_of_era + year_of_era / 4 - year_of_era / 100);
    let month_index = (5 * day_of_year + 2) / 153;
    let day = (day_of_year - (153 * month_index + 2) / 5 + 1) as u32;
    let month = if month_index < 10 {
        month_index + 3
    } else {
        month_index - 9
    } as u32;
    let year = year_of_era + era * 400 + i64::from(month <= 2);
    (year, month, day)
}
