use playout_proto::protocol::{MessageMode, OperatorMessage};
use tokio::sync::RwLock;

/// The operator message, set from the admin surface and read by every build.
#[derive(Debug, Default)]
pub struct MessageBoard {
    current: RwLock<Option<OperatorMessage>>,
}

impl MessageBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty text clears the board.
    pub async fn set(&self, text: &str, mode: MessageMode) -> Option<OperatorMessage> {
        let text = text.trim();
        let message = (!text.is_empty()).then(|| OperatorMessage {
            text: text.to_string(),
            mode,
        });
        *self.current.write().await = message.clone();
        message
    }

    pub async fn get(&self) -> Option<OperatorMessage> {
        self.current.read().await.clone()
    }

    pub async fn is_exclusive(&self) -> bool {
        self.current
            .read()
            .await
            .as_ref()
            .is_some_and(|m| m.mode == MessageMode::Exclusive)
    }
}
