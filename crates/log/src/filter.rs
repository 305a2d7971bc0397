use std::fmt;
use std::sync::{OnceLock, RwLock};

use crate::Level;

/// Default level plus per-module-prefix overrides. The longest matching
/// prefix wins.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Filter {
    default: Level,
    directives: Vec<(String, Level)>,
}

#[derive(Debug, Eq, PartialEq)]
pub enum FilterError {
    UnknownLevel(String),
    EmptyTarget,
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::UnknownLevel(raw) => write!(f, "unknown log level '{raw}'"),
            FilterError::EmptyTarget => write!(f, "log directive has an empty target"),
        }
    }
}

impl std::error::Error for FilterError {}

impl Filter {
    pub fn new(default: Level) -> Self {
        Self {
            default,
            directives: Vec::new(),
        }
    }

    /// Parses `level[,target=level]*`. A bare level sets the default.
    pub fn parse(raw: &str) -> Result<Self, FilterError> {
        let mut filter = Filter::new(Level::Info);
        for part in raw.split(',').map(str::trim).filter(|part| !part.is_empty()) {
            match part.split_once('=') {
                Some((target, level)) => {
                    let target = target.trim();
                    if target.is_empty() {
                        return Err(FilterError::EmptyTarget);
                    }
                    let level = Level::parse(level)
                        .ok_or_else(|| FilterError::UnknownLevel(level.trim().to_string()))?;
                    filter.directives.push((target.to_string(), level));
                }
                None => {
                    filter.default = Level::parse(part)
                        .ok_or_else(|| FilterError::UnknownLevel(part.to_string()))?;
                }
            }
        }
        filter
            .directives
            .sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Ok(filter)
    }

    pub fn default_level(&self) -> Level {
        self.default
    }

    pub fn max_level(&self) -> Level {
        self.directives
            .iter()
            .map(|(_, level)| *level)
            .fold(self.default, Level::max)
    }

    pub fn level_for(&self, target: &str) -> Level {
        self.directives
            .iter()
            .find(|(prefix, _)| target.starts_with(prefix.as_str()))
            .map(|(_, level)| *level)
            .unwrap_or(self.default)
    }
}

static ACTIVE: OnceLock<RwLock<Filter>> = OnceLock::new();

pub(crate) fn install(filter: Filter) {
    let lock = ACTIVE.get_or_init(|| RwLock::new(Filter::new(Level::Info)));
    if let Ok(mut guard) = lock.write() {
        *guard = filter;
    }
}

pub(crate) fn allows(level: Level, target: &str) -> bool {
    let Some(lock) = ACTIVE.get() else {
        return true;
    };
    match lock.read() {
        Ok(guard) => level <= guard.level_for(target),
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_level_sets_default() {
        let filter = Filter::parse("warn").expect("filter");
        assert_eq!(filter.default_level(), Level::Warn);
        assert_eq!(filter.level_for("ledgerd_chainstate"), Level::Warn);
    }

    #[test]
    fn longest_prefix_wins() {
        let filter = Filter::parse(
            "info,ledgerd_chainstate=warn,ledgerd_chainstate::scriptpool=trace",
        )
        .expect("filter");
        assert_eq!(filter.level_for("ledgerd_chainstate::engine"), Level::Warn);
        assert_eq!(
            filter.level_for("ledgerd_chainstate::scriptpool"),
            Level::Trace
        );
        assert_eq!(filter.level_for("ledgerd"), Level::Info);
        assert_eq!(filter.max_level(), Level::Trace);
    }

    #[test]
    fn rejects_bad_directives() {
        assert_eq!(
            Filter::parse("loud"),
            Err(FilterError::UnknownLevel("loud".to_string()))
        );
        assert_eq!(Filter::parse("=debug"), Err(FilterError::EmptyTarget));
    }
}
