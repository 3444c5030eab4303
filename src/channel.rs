//! One-writer/one-reader event channels between socket I/O and the loop.
//!
//! Two buffering flavours:
//! - overwrite-latest for book snapshots and connectivity, where freshness
//!   beats history
//! - FIFO for orders, trades and wallets, where every event must arrive
//!
//! A channel can also be armed (`ask_for`) to run a registered producer the
//! next time the loop services it, which is how venues without native push
//! get polled.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::BoxFuture;
use parking_lot::Mutex;

type Consumer<T> = Box<dyn Fn(&T) + Send + Sync>;
type Producer<T> = Box<dyn Fn() -> BoxFuture<'static, Vec<T>> + Send + Sync>;

enum Buffer<T> {
    Latest(Option<T>),
    Queue(VecDeque<T>),
}

pub struct AsyncEvent<T> {
    buffer: Mutex<Buffer<T>>,
    consumer: Mutex<Option<Consumer<T>>>,
    producer: Mutex<Option<Producer<T>>>,
    asked: AtomicBool,
    closed: AtomicBool,
}

impl<T> AsyncEvent<T> {
    /// Channel that only ever holds the newest value.
    pub fn latest() -> Self {
        Self::with_buffer(Buffer::Latest(None))
    }

    /// Channel that delivers every value in publish order.
    pub fn queue() -> Self {
        Self::with_buffer(Buffer::Queue(VecDeque::new()))
    }

    fn with_buffer(buffer: Buffer<T>) -> Self {
        Self {
            buffer: Mutex::new(buffer),
            consumer: Mutex::new(None),
            producer: Mutex::new(None),
            asked: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Install the consumer callback. Done once at wire-up.
    pub fn write<F: Fn(&T) + Send + Sync + 'static>(&self, consumer: F) {
        *self.consumer.lock() = Some(Box::new(consumer));
    }

    /// Non-blocking publish from the I/O side. Discarded after teardown.
    pub fn try_write(&self, value: T) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        match &mut *self.buffer.lock() {
            Buffer::Latest(slot) => *slot = Some(value),
            Buffer::Queue(queue) => queue.push_back(value),
        }
    }

    /// Arm a one-shot poll; serviced by the loop on its next pass.
    pub fn ask_for(&self) {
        self.asked.store(true, Ordering::Release);
    }

    /// Register the synchronous producer behind `ask_for`.
    pub fn wait_for<F>(&self, producer: F)
    where
        F: Fn() -> BoxFuture<'static, Vec<T>> + Send + Sync + 'static,
    {
        *self.producer.lock() = Some(Box::new(producer));
    }

    /// Deliver everything buffered to the consumer, in order.
    pub fn drain(&self) {
        let pending: Vec<T> = match &mut *self.buffer.lock() {
            Buffer::Latest(slot) => slot.take().into_iter().collect(),
            Buffer::Queue(queue) => queue.drain(..).collect(),
        };
        if pending.is_empty() {
            return;
        }
        let consumer = self.consumer.lock();
        if let Some(consumer) = consumer.as_deref() {
            for value in &pending {
                consumer(value);
            }
        }
    }

    /// Run the producer if the channel was armed, off the frame hot path.
    pub async fn service(&self) {
        if !self.asked.swap(false, Ordering::AcqRel) {
            return;
        }
        let pending = {
            let producer = self.producer.lock();
            producer.as_deref().map(|produce| produce())
        };
        if let Some(pending) = pending {
            for value in pending.await {
                self.try_write(value);
            }
            self.drain();
        }
    }

    /// Teardown at gateway end; later publishes are discarded.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        match &mut *self.buffer.lock() {
            Buffer::Latest(slot) => *slot = None,
            Buffer::Queue(queue) => queue.clear(),
        }
    }
}
