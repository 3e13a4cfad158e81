//! workloom-retry: 指数バックオフ付きリトライライブラリ。
//!
//! プロバイダコネクタ呼び出しのように一時的な失敗だけを再試行したい処理向けに、
//! 判定関数付きのリトライ (`with_retry_if`) も提供する。

pub mod error;
pub mod policy;
pub mod retry;

pub use error::RetryError;
pub use policy::RetryConfig;
pub use retry::{with_retry, with_retry_if};
