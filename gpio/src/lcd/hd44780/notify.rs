//! Completion reporting on top of [Lcd].
//!
//! [LcdWorker] owns the display on a dedicated thread, so the microsecond busy-waits never block
//! the caller. Operations are queued and executed in the order they were submitted.
//!
//! Every operation returns a [Completion], which can be consumed in one of four ways:
//! - `.await`ed, from async code,
//! - [Completion::wait] blocks until the operation finished and returns its result,
//! - [Completion::then] registers a callback, run on the worker thread (or right away if the
//!   operation already finished),
//! - dropping it broadcasts the outcome to every [LcdWorker::subscribe]r as an [LcdEvent].
//!
//! Each outcome is delivered exactly once, after the display lock has been released.

use super::{Lcd, LcdConfig, LcdError, LcdResult};
use crate::{GpioDriver, GpioError};
use log::{debug, error};
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::thread::{Builder, JoinHandle};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, oneshot};

/// A broadcast outcome of an operation nobody waited for.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LcdEvent {
    /// Initialization finished.
    Ready,
    /// A print finished.
    Printed,
    /// The display was cleared.
    Clear,
    /// The cursor was moved home.
    Home,
    /// Any operation failed.
    Error(LcdError),
}

type Callback = Box<dyn FnOnce(LcdResult<()>) + Send>;
type Job = Box<dyn FnOnce(&Lcd) + Send>;

/// Events a subscriber can fall behind by before it starts missing them.
const EVENT_CAPACITY: usize = 64;

#[derive(Clone)]
struct Broadcaster {
    sender: broadcast::Sender<LcdEvent>,
    /// Held while Ready is sent, so a subscriber sees it either latched or on the channel.
    ready: Arc<Mutex<bool>>,
}

impl Broadcaster {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Broadcaster {
            sender,
            ready: Arc::default(),
        }
    }

    fn lock_ready(&self) -> MutexGuard<'_, bool> {
        self.ready.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscribe(&self) -> LcdEvents {
        let ready = self.lock_ready();
        LcdEvents {
            latched: (*ready).then_some(LcdEvent::Ready),
            receiver: self.sender.subscribe(),
        }
    }

    fn broadcast(&self, success: Option<LcdEvent>, result: LcdResult<()>) {
        let event = match result {
            Ok(()) => match success {
                Some(event) => event,
                None => return,
            },
            Err(err) => {
                error!("LCD operation failed: {}", err);
                LcdEvent::Error(err)
            }
        };

        let mut ready = self.lock_ready();
        if event == LcdEvent::Ready {
            *ready = true;
        }
        // Fails only when nobody is subscribed
        _ = self.sender.send(event);
    }
}

/// Receiver of broadcast [LcdEvent]s, see [LcdWorker::subscribe].
///
/// A subscriber that falls more than a few dozen events behind gets [RecvError::Lagged] and
/// skips the oldest ones.
pub struct LcdEvents {
    latched: Option<LcdEvent>,
    receiver: broadcast::Receiver<LcdEvent>,
}

impl LcdEvents {
    pub async fn recv(&mut self) -> Result<LcdEvent, RecvError> {
        match self.latched.take() {
            Some(event) => Ok(event),
            None => self.receiver.recv().await,
        }
    }

    /// Blocking form of [LcdEvents::recv]. Must not be called from async code.
    pub fn blocking_recv(&mut self) -> Result<LcdEvent, RecvError> {
        match self.latched.take() {
            Some(event) => Ok(event),
            None => self.receiver.blocking_recv(),
        }
    }

    pub fn try_recv(&mut self) -> Result<LcdEvent, TryRecvError> {
        match self.latched.take() {
            Some(event) => Ok(event),
            None => self.receiver.try_recv(),
        }
    }
}

impl Debug for LcdEvents {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "LcdEvents")
    }
}

/// The worker's side of a [Completion].
///
/// If the job is dropped without running, e.g. because the worker is gone, the operation
/// finishes with [LcdError::Closed].
struct Completer {
    success: Option<LcdEvent>,
    broadcaster: Broadcaster,
    result: Option<oneshot::Sender<LcdResult<()>>>,
    callback: oneshot::Receiver<Callback>,
}

impl Completer {
    fn finish(&mut self, result: LcdResult<()>) {
        let Some(sender) = self.result.take() else {
            return;
        };

        // After closing, a callback is either already here or never will be
        self.callback.close();
        if let Ok(callback) = self.callback.try_recv() {
            callback(result);
            return;
        }

        if let Err(result) = sender.send(result) {
            // The completion was dropped
            self.broadcaster.broadcast(self.success.clone(), result);
        }
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        self.finish(Err(LcdError::Closed));
    }
}

/// The pending outcome of a queued operation.
///
/// Awaiting it yields the result, just like [Completion::wait] does for blocking code.
#[must_use = "dropping a Completion broadcasts its outcome instead of returning it"]
pub struct Completion {
    result: oneshot::Receiver<LcdResult<()>>,
    callback: oneshot::Sender<Callback>,
}

impl Completion {
    /// Blocks until the operation finishes and returns its result. Must not be called from
    /// async code, `.await` the completion there instead.
    pub fn wait(self) -> LcdResult<()> {
        self.result.blocking_recv().unwrap_or(Err(LcdError::Closed))
    }

    /// Runs `callback` with the result once the operation finishes.
    ///
    /// The callback runs on the worker thread, and must not wait for other operations of the
    /// same worker.
    pub fn then(self, callback: impl FnOnce(LcdResult<()>) + Send + 'static) {
        let Completion {
            result,
            callback: sender,
        } = self;
        if let Err(callback) = sender.send(Box::new(callback)) {
            // The worker is already done with it, and the result is on its way
            callback(result.blocking_recv().unwrap_or(Err(LcdError::Closed)));
        }
    }
}

impl Future for Completion {
    type Output = LcdResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.result)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(LcdError::Closed)))
    }
}

impl Debug for Completion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Completion")
    }
}

/// Runs an [Lcd] on its own thread.
///
/// Dropping the worker lets it finish the queued operations, then joins the thread.
pub struct LcdWorker {
    jobs: Option<mpsc::UnboundedSender<Job>>,
    thread: Option<JoinHandle<()>>,
    broadcaster: Broadcaster,
}

impl LcdWorker {
    /// Moves `lcd` onto a new worker thread. The display is used as-is, not initialized.
    pub fn spawn(lcd: Lcd) -> LcdResult<Self> {
        Self::spawn_with(Builder::new(), lcd)
    }

    fn spawn_with(builder: Builder, lcd: Lcd) -> LcdResult<Self> {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        let thread = builder
            .name("lcd-worker".to_string())
            .spawn(move || {
                debug!("{:?} worker started", lcd);
                while let Some(job) = rx.blocking_recv() {
                    job(&lcd);
                }
                debug!("{:?} worker stopped", lcd);
            })
            .map_err(GpioError::from)?;

        Ok(LcdWorker {
            jobs: Some(jobs),
            thread: Some(thread),
            broadcaster: Broadcaster::new(),
        })
    }

    /// Exports the pins and starts a worker.
    ///
    /// The configuration is checked, the pins are exported and the thread is started before
    /// returning, so those errors are reported directly. Initialization is queued as the first
    /// operation unless suppressed, and its outcome is broadcast as [LcdEvent::Ready] or
    /// [LcdEvent::Error].
    pub fn open(gpio: &dyn GpioDriver, config: LcdConfig) -> LcdResult<Self> {
        let auto_init = !config.suppress_auto_init;
        let lcd = Lcd::open(gpio, config.with_suppress_auto_init(true))?;
        let worker = Self::spawn(lcd)?;
        if auto_init {
            drop(worker.init());
        }
        Ok(worker)
    }

    /// Gets a receiver of broadcast events. If initialization already finished, the receiver
    /// starts with [LcdEvent::Ready].
    pub fn subscribe(&self) -> LcdEvents {
        self.broadcaster.subscribe()
    }

    fn submit(
        &self,
        success: Option<LcdEvent>,
        op: impl FnOnce(&Lcd) -> LcdResult<()> + Send + 'static,
    ) -> Completion {
        let (result_tx, result_rx) = oneshot::channel();
        let (callback_tx, callback_rx) = oneshot::channel();
        let mut completer = Completer {
            success,
            broadcaster: self.broadcaster.clone(),
            result: Some(result_tx),
            callback: callback_rx,
        };

        let job: Job = Box::new(move |lcd: &Lcd| completer.finish(op(lcd)));
        if let Some(jobs) = &self.jobs {
            // On failure the job is dropped, and its completer reports Closed
            _ = jobs.send(job);
        }

        Completion {
            result: result_rx,
            callback: callback_tx,
        }
    }

    pub fn init(&self) -> Completion {
        self.submit(Some(LcdEvent::Ready), Lcd::init)
    }

    pub fn print(&self, text: impl Into<String>) -> Completion {
        let text = text.into();
        self.submit(Some(LcdEvent::Printed), move |lcd| lcd.print(&text))
    }

    pub fn clear(&self) -> Completion {
        self.submit(Some(LcdEvent::Clear), Lcd::clear)
    }

    pub fn home(&self) -> Completion {
        self.submit(Some(LcdEvent::Home), Lcd::home)
    }

    pub fn set_cursor(&self, col: u8, row: u8) -> Completion {
        self.submit(None, move |lcd| lcd.set_cursor(col, row))
    }

    pub fn display(&self) -> Completion {
        self.submit(None, Lcd::display)
    }

    pub fn no_display(&self) -> Completion {
        self.submit(None, Lcd::no_display)
    }

    pub fn cursor(&self) -> Completion {
        self.submit(None, Lcd::cursor)
    }

    pub fn no_cursor(&self) -> Completion {
        self.submit(None, Lcd::no_cursor)
    }

    pub fn blink(&self) -> Completion {
        self.submit(None, Lcd::blink)
    }

    pub fn no_blink(&self) -> Completion {
        self.submit(None, Lcd::no_blink)
    }

    pub fn scroll_display_left(&self) -> Completion {
        self.submit(None, Lcd::scroll_display_left)
    }

    pub fn scroll_display_right(&self) -> Completion {
        self.submit(None, Lcd::scroll_display_right)
    }

    pub fn left_to_right(&self) -> Completion {
        self.submit(None, Lcd::left_to_right)
    }

    pub fn right_to_left(&self) -> Completion {
        self.submit(None, Lcd::right_to_left)
    }

    pub fn autoscroll(&self) -> Completion {
        self.submit(None, Lcd::autoscroll)
    }

    pub fn no_autoscroll(&self) -> Completion {
        self.submit(None, Lcd::no_autoscroll)
    }

    pub fn close(&self) -> Completion {
        self.submit(None, Lcd::close)
    }
}

impl Drop for LcdWorker {
    fn drop(&mut self) {
        // Closing the queue ends the worker loop once the queued jobs are done
        drop(self.jobs.take());
        if let Some(thread) = self.thread.take() {
            _ = thread.join();
        }
    }
}

impl Debug for LcdWorker {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "LcdWorker({})", if self.jobs.is_some() { "running" } else { "stopped" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGpioDriver;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;
    use tokio::time::timeout;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn config() -> LcdConfig {
        LcdConfig::new(0, 1, [2, 3, 4, 5]).with_rows(2)
    }

    async fn next(events: &mut LcdEvents) -> LcdEvent {
        timeout(TIMEOUT, events.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn open_broadcasts_ready() {
        let gpio = MockGpioDriver::new(8);
        let worker = LcdWorker::open(&gpio, config()).unwrap();
        let mut events = worker.subscribe();
        assert_eq!(next(&mut events).await, LcdEvent::Ready);
    }

    #[tokio::test]
    async fn ready_is_latched_for_late_subscribers() {
        let gpio = MockGpioDriver::new(8);
        let worker = LcdWorker::open(&gpio, config()).unwrap();
        // Everything queued after init finishes after it
        worker.home().await.unwrap();

        let mut events = worker.subscribe();
        assert_eq!(events.try_recv(), Ok(LcdEvent::Ready));
        assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn open_rejects_bad_config_directly() {
        let gpio = MockGpioDriver::new(8);
        let result = LcdWorker::open(&gpio, config().with_rows(0));
        assert!(matches!(result, Err(LcdError::Config(_))));
    }

    #[test]
    fn failed_spawn_is_reported() {
        let gpio = MockGpioDriver::new(8);
        let lcd = Lcd::open(&gpio, config()).unwrap();
        // No address space can hold this stack
        let builder = Builder::new().stack_size(1 << 60);
        assert!(matches!(
            LcdWorker::spawn_with(builder, lcd),
            Err(LcdError::Gpio(GpioError::Io(_)))
        ));
        // The display went down with the thread, releasing its pins
        assert!(gpio.export_output(0).is_ok());
    }

    #[test]
    fn wait_returns_result() {
        let gpio = MockGpioDriver::new(8);
        let worker = LcdWorker::open(&gpio, config()).unwrap();
        assert_eq!(worker.print("hi").wait(), Ok(()));
        assert_eq!(worker.set_cursor(0, 1).wait(), Ok(()));
    }

    #[tokio::test]
    async fn completion_is_awaitable() {
        let gpio = MockGpioDriver::new(8);
        let worker = LcdWorker::open(&gpio, config()).unwrap();
        assert_eq!(worker.print("hi").await, Ok(()));

        gpio.fail_writes(1);
        assert!(matches!(worker.clear().await, Err(LcdError::Gpio(_))));
    }

    #[test]
    fn callback_receives_result() {
        let gpio = MockGpioDriver::new(8);
        let worker = LcdWorker::open(&gpio, config()).unwrap();
        let (tx, rx) = std_mpsc::channel();
        worker.clear().then(move |result| tx.send(result).unwrap());
        assert_eq!(rx.recv_timeout(TIMEOUT), Ok(Ok(())));
    }

    #[test]
    fn late_callback_still_runs() {
        let gpio = MockGpioDriver::new(8);
        let worker = LcdWorker::open(&gpio, config()).unwrap();
        let completion = worker.print("x");
        worker.home().wait().unwrap();

        let (tx, rx) = std_mpsc::channel();
        completion.then(move |result| tx.send(result).unwrap());
        assert_eq!(rx.recv_timeout(TIMEOUT), Ok(Ok(())));
    }

    #[tokio::test]
    async fn dropped_completions_are_broadcast() {
        let gpio = MockGpioDriver::new(8);
        let worker = LcdWorker::open(&gpio, config().with_suppress_auto_init(true)).unwrap();
        let mut events = worker.subscribe();

        drop(worker.print("x"));
        drop(worker.cursor());
        drop(worker.home());

        assert_eq!(next(&mut events).await, LcdEvent::Printed);
        assert_eq!(next(&mut events).await, LcdEvent::Home);
    }

    #[tokio::test]
    async fn failures_are_broadcast_once() {
        let gpio = MockGpioDriver::new(8);
        let worker = LcdWorker::open(&gpio, config().with_suppress_auto_init(true)).unwrap();
        let mut events = worker.subscribe();
        gpio.fail_writes(1);

        drop(worker.print("x"));
        assert!(matches!(
            next(&mut events).await,
            LcdEvent::Error(LcdError::Gpio(_))
        ));

        // Awaited failures are only returned, not broadcast
        assert!(worker.clear().await.is_err());
        drop(worker.home());
        assert!(matches!(
            next(&mut events).await,
            LcdEvent::Error(LcdError::Gpio(_))
        ));
        assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn operations_run_in_submission_order() {
        let gpio = MockGpioDriver::new(8);
        let worker = LcdWorker::open(&gpio, config()).unwrap();
        let (tx, rx) = std_mpsc::channel();
        for i in 0..10 {
            let tx = tx.clone();
            worker.print(i.to_string()).then(move |_| tx.send(i).unwrap());
        }
        let order: Vec<i32> = (0..10).map(|_| rx.recv_timeout(TIMEOUT).unwrap()).collect();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn closed_worker_reports_closed() {
        let gpio = MockGpioDriver::new(8);
        let worker = LcdWorker::open(&gpio, config()).unwrap();
        assert_eq!(worker.close().wait(), Ok(()));
        assert_eq!(worker.print("x").wait(), Err(LcdError::Closed));
    }
}
