//! BoxActivityHandler -- object-safe dynamic dispatch wrapper for ActivityHandler.
//!
//! 1. Define an object-safe `ActivityHandlerDyn` trait with boxed futures
//! 2. Blanket-impl `ActivityHandlerDyn` for all `T: ActivityHandler`
//! 3. `BoxActivityHandler` wraps `Box<dyn ActivityHandlerDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use super::handler::{ActivityHandler, ActivityJob};
use crate::jobs::model::ActivityInputs;

/// Object-safe version of [`ActivityHandler`] with boxed futures.
pub trait ActivityHandlerDyn: Send + Sync {
    fn perform_boxed<'a>(
        &'a self,
        job: &'a mut ActivityJob,
        inputs: &'a ActivityInputs,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

impl<T: ActivityHandler> ActivityHandlerDyn for T {
    fn perform_boxed<'a>(
        &'a self,
        job: &'a mut ActivityJob,
        inputs: &'a ActivityInputs,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(self.perform(job, inputs))
    }
}

/// Type-erased activity handler, stored in the `HandlerRegistry`.
pub struct BoxActivityHandler {
    inner: Box<dyn ActivityHandlerDyn>,
}

impl BoxActivityHandler {
    pub fn new<T: ActivityHandler + 'static>(handler: T) -> Self {
        Self {
            inner: Box::new(handler),
        }
    }

    pub async fn perform(&self, job: &mut ActivityJob, inputs: &ActivityInputs) {
        self.inner.perform_boxed(job, inputs).await
    }
}
