//! OCR worker pool
//!
//! One dedicated thread per (language, model path) key consumes a bounded
//! queue, so requests sharing a key are recognized strictly one at a time
//! in arrival order while different keys run in parallel. The recognizer
//! itself is built lazily on the first request. When a worker has waited
//! `idle_timeout` with no queued or in-flight request it removes its
//! registry entry and exits, releasing the recognizer.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::OcrConfig;
use crate::error::{EngineError, EngineResult};
use crate::ocr::{OcrOutput, RecognitionWorker, RecognizeOptions, RecognizerBackend, WorkerKey};

/// Pool tuning
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Quiet period after which an idle worker is torn down
    pub idle_timeout: Duration,
    /// Pending requests allowed per key before callers block
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_millis(3_000),
            queue_capacity: 16,
        }
    }
}

impl From<&OcrConfig> for PoolConfig {
    fn from(config: &OcrConfig) -> Self {
        Self {
            idle_timeout: Duration::from_millis(config.idle_timeout_ms),
            queue_capacity: config.queue_capacity,
        }
    }
}

struct Job {
    image: Vec<u8>,
    options: RecognizeOptions,
    reply: Sender<EngineResult<OcrOutput>>,
}

struct PoolEntry {
    sender: Sender<Job>,
    /// Requests checked out and not yet answered
    active: usize,
    generation: u64,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<WorkerKey, PoolEntry>,
    next_generation: u64,
}

/// Process-wide pool of recognition workers keyed by language and model path
pub struct OcrWorkerPool {
    backend: Arc<dyn RecognizerBackend>,
    registry: Arc<Mutex<Registry>>,
    config: PoolConfig,
}

impl OcrWorkerPool {
    pub fn new(backend: Arc<dyn RecognizerBackend>, config: PoolConfig) -> Self {
        Self {
            backend,
            registry: Arc::new(Mutex::new(Registry::default())),
            config,
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Number of keys with a live worker thread
    pub fn live_workers(&self) -> usize {
        self.registry.lock().entries.len()
    }

    /// Recognize a PNG on the worker for `key`, blocking until it is answered
    pub fn recognize(
        &self,
        key: &WorkerKey,
        image_png: Vec<u8>,
        options: RecognizeOptions,
    ) -> EngineResult<OcrOutput> {
        let flags = options.output;
        let (reply, answer) = bounded(1);
        let (sender, generation) = self.checkout(key)?;

        let job = Job {
            image: image_png,
            options,
            reply,
        };
        if sender.send(job).is_err() {
            discard(&self.registry, key, generation);
            return Err(EngineError::Recognition(format!(
                "OCR worker for '{}' exited",
                key.lang
            )));
        }

        let result = match answer.recv() {
            Ok(result) => result,
            Err(_) => {
                discard(&self.registry, key, generation);
                return Err(EngineError::Recognition(format!(
                    "OCR worker for '{}' dropped the request",
                    key.lang
                )));
            }
        };
        result.map(|output| output.restrict(flags))
    }

    /// Register a request on the key's entry, spawning its worker if needed
    fn checkout(&self, key: &WorkerKey) -> EngineResult<(Sender<Job>, u64)> {
        let mut registry = self.registry.lock();
        if let Some(entry) = registry.entries.get_mut(key) {
            entry.active += 1;
            return Ok((entry.sender.clone(), entry.generation));
        }

        let generation = registry.next_generation;
        registry.next_generation += 1;

        let (sender, receiver) = bounded(self.config.queue_capacity.max(1));
        let worker = WorkerThread {
            backend: self.backend.clone(),
            key: key.clone(),
            receiver,
            registry: Arc::downgrade(&self.registry),
            generation,
            idle_timeout: self.config.idle_timeout,
        };
        thread::Builder::new()
            .name(format!("ocr-{}", key.lang))
            .spawn(move || worker.run())?;

        registry.entries.insert(
            key.clone(),
            PoolEntry {
                sender: sender.clone(),
                active: 1,
                generation,
            },
        );
        info!("Spawned OCR worker thread for {:?} ({})", key, self.backend.name());
        Ok((sender, generation))
    }
}

fn release(registry: &Mutex<Registry>, key: &WorkerKey, generation: u64) {
    let mut registry = registry.lock();
    if let Some(entry) = registry.entries.get_mut(key) {
        if entry.generation == generation {
            entry.active = entry.active.saturating_sub(1);
        }
    }
}

/// Forget an entry whose thread is gone so the next request spawns a fresh one
fn discard(registry: &Mutex<Registry>, key: &WorkerKey, generation: u64) {
    let mut registry = registry.lock();
    if registry.entries.get(key).is_some_and(|e| e.generation == generation) {
        registry.entries.remove(key);
        warn!("Discarded dead OCR worker for {:?}", key);
    }
}

struct WorkerThread {
    backend: Arc<dyn RecognizerBackend>,
    key: WorkerKey,
    receiver: Receiver<Job>,
    registry: Weak<Mutex<Registry>>,
    generation: u64,
    idle_timeout: Duration,
}

impl WorkerThread {
    fn run(self) {
        let mut worker: Option<Box<dyn RecognitionWorker>> = None;

        loop {
            match self.receiver.recv_timeout(self.idle_timeout) {
                Ok(job) => {
                    // A panicking recognizer is dropped and rebuilt on the next job
                    let result = panic::catch_unwind(AssertUnwindSafe(|| self.process(&mut worker, &job)))
                        .unwrap_or_else(|_| {
                            Err(EngineError::Recognition(format!(
                                "recognizer for '{}' panicked",
                                self.key.lang
                            )))
                        });
                    if let Err(e) = &result {
                        warn!("OCR request for {:?} failed: {}", self.key, e);
                    }
                    let _ = job.reply.send(result);
                    match self.registry.upgrade() {
                        Some(registry) => release(&registry, &self.key, self.generation),
                        None => break,
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    let Some(registry) = self.registry.upgrade() else {
                        break;
                    };
                    let mut registry = registry.lock();
                    let (owned, idle) = match registry.entries.get(&self.key) {
                        Some(entry) if entry.generation == self.generation => {
                            (true, entry.active == 0 && self.receiver.is_empty())
                        }
                        _ => (false, false),
                    };
                    if !owned {
                        break;
                    }
                    if idle {
                        registry.entries.remove(&self.key);
                        info!(
                            "OCR worker for {:?} idle for {:?}, tearing down",
                            self.key, self.idle_timeout
                        );
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if worker.take().is_some() {
            debug!("Released recognizer for {:?}", self.key);
        }
    }

    fn process(&self, worker: &mut Option<Box<dyn RecognitionWorker>>, job: &Job) -> EngineResult<OcrOutput> {
        let mut active = match worker.take() {
            Some(w) => w,
            None => {
                let started = Instant::now();
                let w = self.backend.create_worker(&self.key)?;
                info!("Recognizer for {:?} ready in {:?}", self.key, started.elapsed());
                w
            }
        };
        let result = active.recognize(&job.image, &job.options);
        *worker = Some(active);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::OutputFlags;
    use crate::ocr::{BoundingBox, OcrWord};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Depth {
        current: HashMap<String, usize>,
        max: HashMap<String, usize>,
        total: usize,
        total_max: usize,
        /// Image lengths in the order they reached a recognizer
        seen: Vec<usize>,
    }

    struct MockBackend {
        created: AtomicUsize,
        depth: Arc<Mutex<Depth>>,
        delay: Duration,
        fail: bool,
    }

    impl MockBackend {
        fn new(delay: Duration) -> Self {
            Self {
                created: AtomicUsize::new(0),
                depth: Arc::new(Mutex::new(Depth::default())),
                delay,
                fail: false,
            }
        }
    }

    struct MockWorker {
        lang: String,
        depth: Arc<Mutex<Depth>>,
        delay: Duration,
    }

    impl RecognizerBackend for MockBackend {
        fn name(&self) -> &str {
            "mock"
        }

        fn create_worker(&self, key: &WorkerKey) -> EngineResult<Box<dyn RecognitionWorker>> {
            if self.fail {
                return Err(EngineError::RecognitionUnavailable("mock missing".into()));
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockWorker {
                lang: key.lang.clone(),
                depth: self.depth.clone(),
                delay: self.delay,
            }))
        }
    }

    impl RecognitionWorker for MockWorker {
        fn recognize(&mut self, image_png: &[u8], _options: &RecognizeOptions) -> EngineResult<OcrOutput> {
            if image_png.is_empty() {
                panic!("mock recognizer cannot read an empty image");
            }
            {
                let mut d = self.depth.lock();
                d.seen.push(image_png.len());
                let current = {
                    let c = d.current.entry(self.lang.clone()).or_insert(0);
                    *c += 1;
                    *c
                };
                let max = d.max.entry(self.lang.clone()).or_insert(0);
                *max = (*max).max(current);
                d.total += 1;
                d.total_max = d.total_max.max(d.total);
            }
            thread::sleep(self.delay);
            {
                let mut d = self.depth.lock();
                if let Some(c) = d.current.get_mut(&self.lang) {
                    *c -= 1;
                }
                d.total -= 1;
            }
            let text = format!("{}:{}", self.lang, image_png.len());
            Ok(OcrOutput {
                text: text.clone(),
                confidence: 95.0,
                words: vec![OcrWord {
                    text,
                    bbox: BoundingBox::default(),
                    confidence: 95.0,
                }],
                lines: vec![],
            })
        }
    }

    fn pool_with(backend: Arc<MockBackend>, idle_ms: u64) -> Arc<OcrWorkerPool> {
        Arc::new(OcrWorkerPool::new(
            backend,
            PoolConfig {
                idle_timeout: Duration::from_millis(idle_ms),
                queue_capacity: 4,
            },
        ))
    }

    #[test]
    fn test_same_key_is_serialized() {
        let backend = Arc::new(MockBackend::new(Duration::from_millis(20)));
        let pool = pool_with(backend.clone(), 1_000);
        let key = WorkerKey::new("eng", None);

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let pool = pool.clone();
                let key = key.clone();
                thread::spawn(move || pool.recognize(&key, vec![0; i + 1], RecognizeOptions::default()))
            })
            .collect();
        for (i, handle) in handles.into_iter().enumerate() {
            let output = handle.join().unwrap().unwrap();
            assert_eq!(output.text, format!("eng:{}", i + 1));
        }

        assert_eq!(backend.depth.lock().max.get("eng"), Some(&1));
        assert_eq!(backend.created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_different_keys_overlap() {
        let backend = Arc::new(MockBackend::new(Duration::from_millis(300)));
        let pool = pool_with(backend.clone(), 1_000);

        let handles: Vec<_> = ["eng", "deu"]
            .into_iter()
            .map(|lang| {
                let pool = pool.clone();
                thread::spawn(move || {
                    pool.recognize(&WorkerKey::new(lang, None), vec![1], RecognizeOptions::default())
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let depth = backend.depth.lock();
        assert_eq!(depth.total_max, 2);
        assert_eq!(depth.max.get("eng"), Some(&1));
        assert_eq!(depth.max.get("deu"), Some(&1));
    }

    #[test]
    fn test_lang_path_is_part_of_key() {
        let backend = Arc::new(MockBackend::new(Duration::ZERO));
        let pool = pool_with(backend.clone(), 1_000);
        pool.recognize(&WorkerKey::new("eng", None), vec![1], RecognizeOptions::default())
            .unwrap();
        pool.recognize(
            &WorkerKey::new("eng", Some("/opt/tessdata".into())),
            vec![1],
            RecognizeOptions::default(),
        )
        .unwrap();
        assert_eq!(pool.live_workers(), 2);
        assert_eq!(backend.created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_burst_reuses_worker() {
        let backend = Arc::new(MockBackend::new(Duration::ZERO));
        let pool = pool_with(backend.clone(), 500);
        let key = WorkerKey::new("eng", None);
        for _ in 0..3 {
            pool.recognize(&key, vec![1, 2], RecognizeOptions::default()).unwrap();
        }
        assert_eq!(backend.created.load(Ordering::SeqCst), 1);
        assert_eq!(pool.live_workers(), 1);
    }

    #[test]
    fn test_idle_teardown_and_respawn() {
        let backend = Arc::new(MockBackend::new(Duration::ZERO));
        let pool = pool_with(backend.clone(), 50);
        let key = WorkerKey::new("eng", None);

        pool.recognize(&key, vec![1], RecognizeOptions::default()).unwrap();
        thread::sleep(Duration::from_millis(400));
        assert_eq!(pool.live_workers(), 0);

        pool.recognize(&key, vec![1], RecognizeOptions::default()).unwrap();
        assert_eq!(backend.created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_worker_creation_failure_is_typed() {
        let mut backend = MockBackend::new(Duration::ZERO);
        backend.fail = true;
        let pool = pool_with(Arc::new(backend), 1_000);
        let key = WorkerKey::new("eng", None);

        for _ in 0..2 {
            let err = pool
                .recognize(&key, vec![1], RecognizeOptions::default())
                .unwrap_err();
            assert_eq!(err.kind(), "RecognitionUnavailableError");
        }
    }

    #[test]
    fn test_output_flags_applied() {
        let backend = Arc::new(MockBackend::new(Duration::ZERO));
        let pool = pool_with(backend, 1_000);
        let options = RecognizeOptions {
            output: OutputFlags {
                words: false,
                lines: false,
            },
            ..Default::default()
        };
        let output = pool
            .recognize(&WorkerKey::new("eng", None), vec![1, 2, 3], options)
            .unwrap();
        assert_eq!(output.text, "eng:3");
        assert!(output.words.is_empty());
    }

    #[test]
    fn test_same_key_answers_in_arrival_order() {
        let backend = Arc::new(MockBackend::new(Duration::from_millis(40)));
        let pool = pool_with(backend.clone(), 1_000);
        let key = WorkerKey::new("eng", None);

        // Each request is queued well after the previous one while the worker is busy
        let mut handles = Vec::new();
        for len in 1..=5 {
            let pool = pool.clone();
            let key = key.clone();
            handles.push(thread::spawn(move || {
                pool.recognize(&key, vec![7; len], RecognizeOptions::default())
            }));
            thread::sleep(Duration::from_millis(10));
        }
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(backend.depth.lock().seen, vec![1, 2, 3, 4, 5]);
        assert_eq!(backend.created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_recognizer_panic_does_not_poison_key() {
        let backend = Arc::new(MockBackend::new(Duration::ZERO));
        let pool = pool_with(backend.clone(), 1_000);
        let key = WorkerKey::new("eng", None);

        let err = pool.recognize(&key, Vec::new(), RecognizeOptions::default()).unwrap_err();
        assert_eq!(err.kind(), "RecognitionError");

        let output = pool.recognize(&key, vec![1, 2], RecognizeOptions::default()).unwrap();
        assert_eq!(output.text, "eng:2");
        assert_eq!(pool.live_workers(), 1);
        assert_eq!(backend.created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dead_entry_is_discarded() {
        let backend = Arc::new(MockBackend::new(Duration::ZERO));
        let pool = pool_with(backend.clone(), 1_000);
        let key = WorkerKey::new("eng", None);

        // Stand in for a worker thread that died without tearing down its entry
        let (sender, receiver) = bounded(1);
        drop(receiver);
        pool.registry.lock().entries.insert(
            key.clone(),
            PoolEntry {
                sender,
                active: 0,
                generation: 99,
            },
        );

        let err = pool.recognize(&key, vec![1], RecognizeOptions::default()).unwrap_err();
        assert_eq!(err.kind(), "RecognitionError");
        assert_eq!(pool.live_workers(), 0);

        let output = pool.recognize(&key, vec![1], RecognizeOptions::default()).unwrap();
        assert_eq!(output.text, "eng:1");
        assert_eq!(pool.live_workers(), 1);
    }
}
