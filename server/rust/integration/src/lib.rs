pub mod adapter;
pub mod domain;
pub mod infrastructure;
pub mod usecase;

/// テスト用インメモリリポジトリ・フェイクコネクタとヘルパー（統合テストから利用）
pub mod test_support;
