//! Cloud streaming tier: wraps the streaming client as a [`Tier`].

use crate::credentials::CredentialSource;
use crate::error::Result;
use crate::stream::client::{StreamingClientConfig, StreamingTranscriptionClient};
use crate::stream::transport::StreamingTransport;
use crate::tier::{Tier, TierEvent};
use crate::types::{AudioChunk, TierId, TierStatus};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct CloudStreamingTier {
    client: StreamingTranscriptionClient,
    credentials: Arc<dyn CredentialSource>,
    service: String,
}

impl CloudStreamingTier {
    pub fn new(
        transport: Arc<dyn StreamingTransport>,
        config: StreamingClientConfig,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        let service = config.service.clone();
        Self {
            client: StreamingTranscriptionClient::new(transport, config),
            credentials,
            service,
        }
    }

    /// The wrapped client, for state inspection.
    pub fn client(&self) -> &StreamingTranscriptionClient {
        &self.client
    }
}

#[async_trait]
impl Tier for CloudStreamingTier {
    fn id(&self) -> TierId {
        TierId::CloudStreaming
    }

    fn status(&self) -> TierStatus {
        match self.credentials.get_api_key(&self.service) {
            Some(key) if !key.is_empty() => TierStatus::available(TierId::CloudStreaming),
            _ => TierStatus::unavailable(
                TierId::CloudStreaming,
                format!("no API key configured for {}", self.service),
            ),
        }
    }

    async fn start(&self, events: mpsc::Sender<TierEvent>) -> Result<()> {
        // Credentials are re-read at every start so a key added mid-process
        // is picked up without reconstruction.
        self.client
            .configure(self.credentials.get_api_key(&self.service));
        self.client.start(events)
    }

    async fn stop(&self) {
        self.client.stop().await;
    }

    fn send_audio(&self, chunk: &AudioChunk) {
        self.client.send_audio(chunk);
    }

    fn provides_pause_events(&self) -> bool {
        // The backend's own silence detection supplies utterance boundaries.
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;
    use crate::stream::transport::MockTransport;
    use crate::types::TranscriptEvent;

    fn make_tier(credentials: StaticCredentials) -> (CloudStreamingTier, MockTransport) {
        let transport = MockTransport::new();
        let tier = CloudStreamingTier::new(
            Arc::new(transport.clone()),
            StreamingClientConfig::default(),
            Arc::new(credentials),
        );
        (tier, transport)
    }

    #[test]
    fn status_reflects_credential_presence() {
        let (with_key, _) = make_tier(StaticCredentials::new().with_key("cloud-stt", "sk-1"));
        assert!(with_key.status().available);

        let (without_key, _) = make_tier(StaticCredentials::new());
        let status = without_key.status();
        assert!(!status.available);
        assert!(status.reason.unwrap().contains("no API key"));
    }

    #[tokio::test]
    async fn start_without_credentials_fails_cleanly() {
        let (tier, _) = make_tier(StaticCredentials::new());
        let (tx, _rx) = mpsc::channel(8);
        assert!(tier.start(tx).await.is_err());
    }

    #[tokio::test]
    async fn audio_flows_through_to_the_transport() {
        let (tier, transport) = make_tier(StaticCredentials::new().with_key("cloud-stt", "sk-1"));
        let (tx, mut rx) = mpsc::channel(8);

        tier.start(tx).await.unwrap();
        tier.send_audio(&AudioChunk::mono_16k(vec![0.5; 160], 0));

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while transport.sent_audio().is_empty() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        transport.emit(crate::stream::transport::TransportEvent::Transcript {
            text: "hi".to_string(),
            is_final: true,
            confidence: 1.0,
        });
        match rx.recv().await.unwrap() {
            TierEvent::Transcript(TranscriptEvent { text, tier, .. }) => {
                assert_eq!(text, "hi");
                assert_eq!(tier, TierId::CloudStreaming);
            }
            other => panic!("expected transcript, got {:?}", other),
        }

        tier.stop().await;
    }
}
