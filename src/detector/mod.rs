//! 变化检测 - 判断哪些采样值得上报

mod restart;
mod status;

pub use restart::{RestartCheck, RestartDetector};
pub use status::{ObservedState, Transition, TransitionDetector, TransitionKind};
