//! Execution of task requests received from the master.

use bytes::Bytes;
use tickets_dispatch::Fetcher;
use tickets_protocol::{Envelope, Payload, TaskResult};
use tracing::{debug, warn};

/// Handle one inbound frame and return the reply frame, if any.
///
/// A task request always gets a task result with the same transaction ID;
/// a failed fetch is reported as a failed result rather than dropped.
/// Frames that cannot be decoded, and anything that is not a task request,
/// get no reply.
pub async fn handle_frame(
    fetcher: &dyn Fetcher,
    frame: &[u8],
    max_frame_bytes: usize,
) -> Option<Bytes> {
    let envelope = match Envelope::decode_with_limit(frame, max_frame_bytes) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "Skipping malformed frame from master");
            return None;
        }
    };

    let request = match envelope.payload {
        Payload::TaskRequest(request) => request,
        other => {
            warn!(
                transaction_id = envelope.transaction_id,
                kind = %other.kind(),
                "Ignoring unexpected message from master"
            );
            return None;
        }
    };

    let result = match fetcher.fetch(&request.target_url).await {
        Ok(body) => {
            debug!(
                transaction_id = envelope.transaction_id,
                bytes = body.len(),
                "Task completed"
            );
            TaskResult::success(body)
        }
        Err(e) => {
            warn!(
                transaction_id = envelope.transaction_id,
                url = %request.target_url,
                error = %e,
                "Task failed"
            );
            TaskResult::failure(e.to_string())
        }
    };

    Some(Envelope::new(envelope.transaction_id, Payload::TaskResult(result)).encode())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tickets_dispatch::FetchError;
    use tickets_protocol::{TaskRequest, MAX_FRAME_SIZE};

    struct Echo;

    #[async_trait]
    impl Fetcher for Echo {
        async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
            if url.contains("fail") {
                Err(FetchError::Status(403))
            } else {
                Ok(Bytes::copy_from_slice(url.as_bytes()))
            }
        }
    }

    fn request(transaction_id: u64, url: &str) -> Bytes {
        Envelope::new(transaction_id, Payload::TaskRequest(TaskRequest::new(url))).encode()
    }

    #[tokio::test]
    async fn test_request_answered_with_same_transaction() {
        let reply = handle_frame(&Echo, &request(17, "https://a.test/q"), MAX_FRAME_SIZE)
            .await
            .unwrap();

        let envelope = Envelope::decode(&reply).unwrap();
        assert_eq!(envelope.transaction_id, 17);
        assert_eq!(
            envelope.payload,
            Payload::TaskResult(TaskResult::success(&b"https://a.test/q"[..]))
        );
    }

    #[tokio::test]
    async fn test_fetch_failure_is_reported() {
        let reply = handle_frame(&Echo, &request(3, "https://a.test/fail"), MAX_FRAME_SIZE)
            .await
            .unwrap();

        let envelope = Envelope::decode(&reply).unwrap();
        match envelope.payload {
            Payload::TaskResult(result) => {
                assert_eq!(result.outcome, Err("upstream returned status 403".to_string()));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_garbage_gets_no_reply() {
        assert!(handle_frame(&Echo, b"\x01\x01", MAX_FRAME_SIZE).await.is_none());
    }

    #[tokio::test]
    async fn test_result_from_master_is_ignored() {
        let frame =
            Envelope::new(1, Payload::TaskResult(TaskResult::success(Bytes::new()))).encode();
        assert!(handle_frame(&Echo, &frame, MAX_FRAME_SIZE).await.is_none());
    }
}
