//! Handlers the CLI registers from `[[handlers]]` config entries.

use pollwire_config::HandlerConfig;
use pollwire_core::{BoxFuture, Handler, HandlerError, Session};
use tracing::info;

/// Logs every payload it receives.
pub struct LogHandler {
    tag: String,
}

impl Handler for LogHandler {
    fn handle<'a>(&'a self, payload: &'a [u8]) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async move {
            info!(
                tag = %self.tag,
                bytes = payload.len(),
                payload = %String::from_utf8_lossy(payload),
                "Received"
            );
            Ok(())
        })
    }
}

/// Writes every payload it receives back out under `reply_tag`.
pub struct EchoHandler {
    session: Session,
    reply_tag: String,
}

impl Handler for EchoHandler {
    fn handle<'a>(&'a self, payload: &'a [u8]) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async move {
            self.session
                .write(&self.reply_tag, payload)
                .await
                .map_err(|e| HandlerError::new(format!("echo to {:?}: {e}", self.reply_tag)))
        })
    }
}

/// Register one handler per config entry on `session`.
pub fn register(session: &Session, configs: &[HandlerConfig]) -> anyhow::Result<()> {
    for config in configs {
        match config.action.as_str() {
            "log" => session.add_handler(
                config.tag.clone(),
                LogHandler {
                    tag: config.tag.clone(),
                },
            ),
            "echo" => {
                let reply_tag = config.reply_tag.clone().ok_or_else(|| {
                    anyhow::anyhow!("echo handler for {:?} needs a reply_tag", config.tag)
                })?;
                session.add_handler(
                    config.tag.clone(),
                    EchoHandler {
                        session: session.clone(),
                        reply_tag,
                    },
                );
            }
            other => anyhow::bail!("unknown handler action {other:?} for tag {:?}", config.tag),
        }
        info!(tag = %config.tag, action = %config.action, "Handler registered");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    use pollwire_test_utils::config::TestConfigBuilder;
    use pollwire_test_utils::session::{RecordingHandler, RunningSession, fast_options, linked_sessions};

    fn entries(builder: TestConfigBuilder) -> Vec<HandlerConfig> {
        builder.build().handlers
    }

    #[tokio::test]
    async fn test_register_from_config() {
        let (session, _peer) = linked_sessions(fast_options());
        let handlers = entries(
            TestConfigBuilder::new()
                .handler("notes", "log", None)
                .handler("ping", "echo", Some("pong")),
        );
        register(&session, &handlers).unwrap();
        assert_eq!(session.handler_tags(), vec!["notes", "ping"]);
    }

    #[tokio::test]
    async fn test_register_rejects_unknown_action() {
        let (session, _peer) = linked_sessions(fast_options());
        let unknown = entries(TestConfigBuilder::new().handler("x", "shout", None));
        assert!(register(&session, &unknown).is_err());
        let no_reply = entries(TestConfigBuilder::new().handler("x", "echo", None));
        assert!(register(&session, &no_reply).is_err());
    }

    #[test_log::test(tokio::test)]
    async fn test_echo_replies_under_reply_tag() {
        let (local, remote) = linked_sessions(fast_options());
        let handlers = entries(TestConfigBuilder::new().handler("ping", "echo", Some("pong")));
        register(&local, &handlers).unwrap();
        let pong = RecordingHandler::new();
        remote.add_handler("pong", Arc::clone(&pong));

        remote.write("ping", "hello").await.unwrap();
        let local = RunningSession::start(local).await;
        let remote = RunningSession::start(remote).await;

        let seen = pong.wait_for(1, Duration::from_secs(5)).await;
        assert_eq!(seen, vec![b"hello".to_vec()]);

        local.shutdown().await.unwrap();
        remote.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_log_handler_accepts_any_payload() {
        let handler = LogHandler {
            tag: "notes".to_string(),
        };
        handler.handle(&[0xff, 0x00]).await.unwrap();
    }
}
