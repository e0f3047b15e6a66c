use std::sync::mpsc::Sender;
use std::sync::Arc;

use crate::messages::EventSendResult;

/// Where a relay posts the outcome of a send.
///
/// Each handled request owns its sink, so results are never delivered to
/// another caller.
pub trait ReplySink: Send + 'static {
    fn post_message(&self, result: EventSendResult);
}

impl ReplySink for Sender<EventSendResult> {
    fn post_message(&self, result: EventSendResult) {
        if self.send(result).is_err() {
            log::debug!("reply dropped: receiver is gone");
        }
    }
}

impl<T: ReplySink + Sync + ?Sized> ReplySink for Arc<T> {
    fn post_message(&self, result: EventSendResult) {
        (**self).post_message(result)
    }
}

impl ReplySink for Box<dyn ReplySink> {
    fn post_message(&self, result: EventSendResult) {
        (**self).post_message(result)
    }
}

/// Adapts a closure into a `ReplySink`.
#[derive(Debug, Clone)]
pub struct ReplyFn<F>(pub F);

impl<F> ReplySink for ReplyFn<F>
where
    F: Fn(EventSendResult) + Send + 'static,
{
    fn post_message(&self, result: EventSendResult) {
        (self.0)(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::mpsc::channel;

    fn sent() -> EventSendResult {
        EventSendResult::Sent {
            data: serde_json::json!({ "ok": true }),
        }
    }

    #[test]
    fn test_sender_sink() {
        let (tx, rx) = channel();
        tx.post_message(sent());
        assert_eq!(rx.recv().unwrap(), sent());
    }

    #[test]
    fn test_sender_sink_without_receiver() {
        let (tx, rx) = channel::<EventSendResult>();
        drop(rx);
        tx.post_message(sent());
    }

    #[test]
    fn test_closure_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            ReplyFn(move |result| seen.lock().push(result))
        };
        let boxed: Box<dyn ReplySink> = Box::new(sink);
        boxed.post_message(sent());
        assert_eq!(*seen.lock(), vec![sent()]);
    }
}
