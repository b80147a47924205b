use crate::BroadcastMessage;
use tokio::sync::broadcast;

/// A tracing layer that forwards warnings and errors to connected
/// control-surface clients.
pub struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    pub fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        // Only WARN and ERROR, the rest would flood the clients.
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // No receivers is fine.
        let _ = self.sender.send(BroadcastMessage::Log {
            error: *level == tracing::Level::ERROR,
            message,
        });
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_only_warnings_and_errors_are_forwarded() {
        let (tx, mut rx) = broadcast::channel(8);
        let subscriber = tracing_subscriber::registry().with(BroadcastLayer::new(tx));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("routine");
            tracing::warn!(zone = "Den", "webserver down");
            tracing::error!("build failed");
        });

        match rx.try_recv() {
            Ok(BroadcastMessage::Log { error, message }) => {
                assert!(!error);
                assert!(message.contains("[WARN] "));
                assert!(message.contains("webserver down"));
                assert!(message.contains("zone=\"Den\""));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            rx.try_recv(),
            Ok(BroadcastMessage::Log { error: true, .. })
        ));
        assert!(rx.try_recv().is_err());
    }
}
