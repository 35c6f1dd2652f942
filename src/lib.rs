pub mod constants;
pub mod export;
pub mod glottis;
pub mod lf_pulse;
pub mod optimizer;
pub mod param;
pub mod sequence;
pub mod session;
pub mod signal;
#[cfg(feature = "speaker")]
pub mod speaker;
pub mod synthesis;
pub mod tds;
pub mod tl;
pub mod tract;
pub mod tube;
