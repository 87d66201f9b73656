use thiserror::Error;

/// キャプチャまでの各段階で発生するエラー
///
/// どれも実行を終了させる。単一インターフェースのアドレス読み取り失敗だけは
/// ログに出してスキップし、エラーにはしない。
#[derive(Debug, Error)]
pub enum SnifferError {
    /// インターフェースまたはキャプチャデバイスの列挙に失敗
    #[error("failed to enumerate interfaces: {0}")]
    InterfaceEnumerationFailed(String),

    /// コンテナのゲートウェイアドレスを持つインターフェースがない
    #[error("no interface carries address {target}")]
    InterfaceNotFound { target: String },

    /// コンテナランタイムに接続できない、または応答が不正
    #[error("container inventory failed: {0}")]
    ContainerInventoryFailed(String),

    /// 選択を読み取れない、またはコンテナを指していない
    #[error("selection failed: {0}")]
    SelectionFailed(String),

    /// pcap のデバイス一覧にインターフェースがない
    #[error("capture device not found: {0}")]
    DeviceNotFound(String),

    /// フィルタ式のコンパイルに失敗
    #[error("invalid capture filter {filter:?}: {source}")]
    InvalidFilter {
        filter: String,
        source: pcap::Error,
    },

    /// デバイスのオープンまたは読み込みに失敗
    #[error("capture error: {0}")]
    CaptureError(#[from] pcap::Error),

    /// 入力の読み取りまたはコンソール出力に失敗
    #[error("console I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SnifferError>;
