//! Swapchain image bookkeeping: an acquire/wait/release state machine over
//! the backend's image array. The backend owns the images; this layer owns
//! the ordering contract.

use crate::compositor::{SwapchainBackend, SwapchainCreateInfo};
use crate::error::{XrError, XrResult};
use crate::handles::HandleObject;
use crate::math::XrDuration;
use crate::session::Session;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ImageState {
    Ready,
    Acquired,
    Waited,
}

struct ImageTracker {
    states: Box<[ImageState]>,
    /// Acquired indices, in acquire order; wait consumes from the front.
    fifo: VecDeque<u32>,
    waited: Option<u32>,
    /// Set while a wait is in flight on the backend, before it lands in
    /// `waited`. Guards the one-waited-image rule across the blocking call.
    wait_pending: bool,
    released: Option<u32>,
    acquired_count: usize,
}

pub struct Swapchain {
    pub(crate) session: Weak<Session>,
    pub(crate) backend: Arc<dyn SwapchainBackend>,
    info: SwapchainCreateInfo,
    images: Mutex<ImageTracker>,
}

impl Swapchain {
    pub(crate) fn new(
        session: Weak<Session>,
        backend: Arc<dyn SwapchainBackend>,
        info: SwapchainCreateInfo,
    ) -> Self {
        let image_count = backend.image_count();
        Self {
            session,
            backend,
            info,
            images: Mutex::new(ImageTracker {
                states: vec![ImageState::Ready; image_count].into_boxed_slice(),
                fifo: VecDeque::with_capacity(image_count),
                waited: None,
                wait_pending: false,
                released: None,
                acquired_count: 0,
            }),
        }
    }

    pub(crate) fn create_info(&self) -> &SwapchainCreateInfo {
        &self.info
    }

    pub fn image_count(&self) -> usize {
        self.images.lock().unwrap().states.len()
    }

    /// The index of the most recently released image, if any. Layers can
    /// only reference swapchains that have one.
    pub(crate) fn released_index(&self) -> Option<u32> {
        self.images.lock().unwrap().released
    }

    pub fn acquire_image(&self) -> XrResult<u32> {
        let mut images = self.images.lock().unwrap();

        if images.acquired_count >= images.states.len() {
            return Err(XrError::CallOrderInvalid);
        }
        // A static swapchain's single cycle is over once an image has been
        // waited on or released.
        if self.info.is_static && (images.waited.is_some() || images.released.is_some()) {
            return Err(XrError::CallOrderInvalid);
        }

        let index = self.backend.acquire()?;
        let state = images
            .states
            .get(index as usize)
            .copied()
            .ok_or(XrError::RuntimeFailure("backend acquired bad image index"))?;
        if state != ImageState::Ready {
            return Err(XrError::RuntimeFailure("backend acquired non-ready image"));
        }

        images.states[index as usize] = ImageState::Acquired;
        images.acquired_count += 1;
        images.fifo.push_back(index);
        if images.released == Some(index) {
            images.released = None;
        }
        Ok(index)
    }

    pub fn wait_image(&self, timeout: XrDuration) -> XrResult<()> {
        let index = {
            let mut images = self.images.lock().unwrap();
            if images.waited.is_some() || images.wait_pending {
                return Err(XrError::CallOrderInvalid);
            }
            let index = images.fifo.pop_front().ok_or(XrError::CallOrderInvalid)?;
            images.wait_pending = true;
            index
        };

        // The backend wait can block; don't hold our lock across it.
        let waited = self.backend.wait(index, timeout);

        let mut images = self.images.lock().unwrap();
        images.wait_pending = false;
        if let Err(e) = waited {
            images.fifo.push_front(index);
            return Err(e);
        }
        images.states[index as usize] = ImageState::Waited;
        images.waited = Some(index);
        Ok(())
    }

    pub fn release_image(&self) -> XrResult<()> {
        let mut images = self.images.lock().unwrap();
        let index = images.waited.ok_or(XrError::CallOrderInvalid)?;

        self.backend.release(index)?;
        images.states[index as usize] = ImageState::Ready;
        images.waited = None;
        images.acquired_count -= 1;
        images.released = Some(index);
        Ok(())
    }
}

impl HandleObject for Swapchain {}
