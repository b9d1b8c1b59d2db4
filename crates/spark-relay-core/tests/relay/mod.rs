//! 中继会话的端到端行为测试，全部基于内存双工传输。

mod lifecycle;
mod protocol;
mod support;
