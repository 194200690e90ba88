//! Listener trait implemented by each reconciler.

use async_trait::async_trait;

use crate::{ChangeEvent, TaskResult};

/// Handler for one object type's change stream.
///
/// Each reconciler implements this trait and is driven by an
/// [`EventWorker`](crate::EventWorker), which calls [`dispatch`](Listener::dispatch)
/// for every event in arrival order.
///
/// # Error contract
///
/// Validation and conflict errors are terminal for the event. A handler
/// must not leave partial state behind when it returns an error before
/// its first downstream mutation.
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    /// Object type carried by the stream.
    type Object: Send + Sync + 'static;

    /// Returns the name of this listener (for logging).
    fn name(&self) -> &str;

    async fn add(&self, id: &str, object: &Self::Object) -> TaskResult<()>;

    async fn update(
        &self,
        id: &str,
        before: &Self::Object,
        after: &Self::Object,
    ) -> TaskResult<()>;

    async fn remove(&self, id: &str, object: &Self::Object) -> TaskResult<()>;

    /// Routes an event to the matching handler.
    async fn dispatch(&self, event: &ChangeEvent<Self::Object>) -> TaskResult<()> {
        match event {
            ChangeEvent::Add { id, object } => self.add(id, object).await,
            ChangeEvent::Update { id, before, after } => self.update(id, before, after).await,
            ChangeEvent::Remove { id, object } => self.remove(id, object).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TaskError;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Listener for Recorder {
        type Object = u32;

        fn name(&self) -> &str {
            "recorder"
        }

        async fn add(&self, id: &str, object: &u32) -> TaskResult<()> {
            self.calls.lock().push(format!("add {id} {object}"));
            Ok(())
        }

        async fn update(&self, id: &str, before: &u32, after: &u32) -> TaskResult<()> {
            if before == after {
                return Err(TaskError::ignored("unchanged"));
            }
            self.calls.lock().push(format!("update {id} {before}->{after}"));
            Ok(())
        }

        async fn remove(&self, id: &str, _object: &u32) -> TaskResult<()> {
            self.calls.lock().push(format!("remove {id}"));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dispatch_routes_events() {
        let listener = Recorder::default();
        listener.dispatch(&ChangeEvent::add("a", 1)).await.unwrap();
        listener.dispatch(&ChangeEvent::update("a", 1, 2)).await.unwrap();
        assert!(listener.dispatch(&ChangeEvent::update("a", 2, 2)).await.is_err());
        listener.dispatch(&ChangeEvent::remove("a", 2)).await.unwrap();

        assert_eq!(
            *listener.calls.lock(),
            vec!["add a 1", "update a 1->2", "remove a"]
        );
    }
}
