//! Components D and G: the pre-filter and the stream evaluator.

pub mod pre_filter;
pub mod stream_evaluator;

pub use pre_filter::{ForwardedMessage, PreFilter, PreFilterConfig};
pub use stream_evaluator::{Evaluator, EvaluatorStats};
