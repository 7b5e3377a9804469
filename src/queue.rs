use crate::constants::PREVIEW_QUEUE_BUFFER;
use crate::preview::{Preview, RenderedPreview};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

/// A finished render, tagged with the document revision it was made from.
#[derive(Debug, Clone)]
pub struct PreviewOutput {
    pub revision: u64,
    pub preview: RenderedPreview,
}

type Job = (u64, String, oneshot::Sender<PreviewOutput>);

/// Single-slot render worker. Renders run one at a time off the async
/// threads, and requests arriving while one is pending are dropped so rapid
/// typing never builds a backlog.
#[derive(Clone)]
pub struct PreviewQueue {
    sender: mpsc::Sender<Job>,
    worker_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl PreviewQueue {
    pub fn new(preview: Preview) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Job>(PREVIEW_QUEUE_BUFFER);

        let handle = tokio::spawn(async move {
            while let Some((revision, markdown, result_sender)) = receiver.recv().await {
                let preview = preview.clone();
                let rendered = tokio::task::spawn_blocking(move || preview.render(&markdown)).await;
                match rendered {
                    Ok(preview) => {
                        // The caller may have stopped waiting.
                        let _ = result_sender.send(PreviewOutput { revision, preview });
                    }
                    Err(e) => tracing::error!("Preview render task failed: {}", e),
                }
            }
            tracing::debug!("Preview worker shutting down");
        });

        Self {
            sender,
            worker_handle: Arc::new(Mutex::new(Some(handle))),
        }
    }

    /// Queues a render of `markdown` for `revision`.
    ///
    /// Returns `None` when the request was dropped because another render is
    /// already waiting, or when the worker is gone.
    pub async fn enqueue(&self, revision: u64, markdown: String) -> Option<PreviewOutput> {
        let (result_sender, result_receiver) = oneshot::channel();
        if self
            .sender
            .try_send((revision, markdown, result_sender))
            .is_err()
        {
            tracing::debug!("Preview queue full, dropping revision {}", revision);
            return None;
        }
        result_receiver.await.ok()
    }

    /// Waits for the worker to finish once every queue handle is dropped.
    pub async fn shutdown(self) {
        let handle = self.worker_handle.lock().await.take();
        drop(self.sender);
        if let Some(h) = handle {
            match h.await {
                Ok(()) => tracing::debug!("Preview worker shut down cleanly"),
                Err(e) => tracing::warn!("Preview worker panicked: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enqueue_renders_with_revision() {
        let queue = PreviewQueue::new(Preview::new());
        let output = queue.enqueue(7, "# A\n\nPara".to_string()).await.unwrap();
        assert_eq!(output.revision, 7);
        assert!(output.preview.mapping.is_supported());
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_sequential_requests_all_complete() {
        let queue = PreviewQueue::new(Preview::new());
        for revision in 0..3 {
            let output = queue
                .enqueue(revision, format!("para {}", revision))
                .await
                .unwrap();
            assert!(output.preview.html.contains(&format!("para {}", revision)));
        }
    }
}
