//! 重启检测 - 比较 ActiveEnterTimestamp
//!
//! 比状态跟踪弱：时间戳任何变化都算重启，不改变时间戳的状态变化检测不到

/// Outcome of comparing one activation timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartCheck {
    /// No prior value, baseline recorded
    Initialized { current: String },
    Restarted { previous: String, current: String },
    NoRestart,
}

impl RestartCheck {
    /// Whether the stored value must be rewritten
    pub fn changed_value(&self) -> Option<&str> {
        match self {
            RestartCheck::Initialized { current } | RestartCheck::Restarted { current, .. } => {
                Some(current)
            }
            RestartCheck::NoRestart => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct RestartDetector {
    last: Option<String>,
}

impl RestartDetector {
    pub fn new(last: Option<String>) -> Self {
        Self { last }
    }

    pub fn last(&self) -> Option<&str> {
        self.last.as_deref()
    }

    pub fn observe(&mut self, timestamp: &str) -> RestartCheck {
        match self.last.as_deref() {
            None => {
                self.last = Some(timestamp.to_string());
                RestartCheck::Initialized {
                    current: timestamp.to_string(),
                }
            }
            Some(prev) if prev == timestamp => RestartCheck::NoRestart,
            Some(_) => {
                let previous = self.last.replace(timestamp.to_string()).unwrap_or_default();
                RestartCheck::Restarted {
                    previous,
                    current: timestamp.to_string(),
                }
            }
        }
    }
}
