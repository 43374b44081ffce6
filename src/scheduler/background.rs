//! Off-critical-path full rebuilds for the background refresh variant.
//!
//! The worker owns a third "staging" generation while a rebuild is in
//! flight. Frames never wait for it: the finished generation is swapped
//! into the arena at the start of the first frame that finds it ready, and
//! the displaced one becomes the new staging buffer, so no generation is
//! ever reallocated.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

use crate::camera::Camera;
use crate::error::{SortError, SortResult};
use crate::generation::GenerationBuffer;
use crate::sorting::{BuildReport, TileSortBuilder};
use crate::splats::ProjectionProvider;

struct RefreshJob {
    frame: u64,
    snapshot: u64,
    camera: Camera,
    buffer: GenerationBuffer,
}

/// A rebuild returned by the worker. `buffer` is always handed back, even
/// when the rebuild failed.
pub struct CompletedRefresh {
    pub frame: u64,
    pub snapshot: u64,
    pub buffer: GenerationBuffer,
    pub result: SortResult<BuildReport>,
}

pub struct BackgroundRefresh {
    jobs: Option<Sender<RefreshJob>>,
    done: Receiver<CompletedRefresh>,
    staging: Option<GenerationBuffer>,
    in_flight: Option<u64>,
    worker: Option<JoinHandle<()>>,
}

impl BackgroundRefresh {
    pub fn spawn(
        provider: Arc<dyn ProjectionProvider>,
        builder: TileSortBuilder,
        staging: GenerationBuffer,
    ) -> SortResult<Self> {
        let (job_sender, job_receiver) = bounded::<RefreshJob>(1);
        let (done_sender, done_receiver) = bounded::<CompletedRefresh>(1);

        let worker = thread::Builder::new()
            .name("background_refresh".to_owned())
            .spawn(move || {
                for job in job_receiver.iter() {
                    let RefreshJob {
                        frame,
                        snapshot,
                        camera,
                        mut buffer,
                    } = job;
                    let result = builder.rebuild(provider.as_ref(), &camera, snapshot, &mut buffer);
                    let completed = CompletedRefresh {
                        frame,
                        snapshot,
                        buffer,
                        result,
                    };
                    if done_sender.send(completed).is_err() {
                        break;
                    }
                }
            })
            .map_err(|err| SortError::BackgroundWorker(format!("spawn failed: {}", err)))?;

        Ok(Self {
            jobs: Some(job_sender),
            done: done_receiver,
            staging: Some(staging),
            in_flight: None,
            worker: Some(worker),
        })
    }

    /// Frame whose rebuild is currently running, if any.
    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    /// Queues a rebuild against `camera` (the camera of frame `snapshot`).
    /// Returns `false` without queueing when a rebuild is already running.
    pub fn submit(&mut self, frame: u64, snapshot: u64, camera: Camera) -> SortResult<bool> {
        let Some(buffer) = self.staging.take() else {
            return Ok(false);
        };
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| SortError::BackgroundWorker("worker stopped".into()))?;
        jobs.send(RefreshJob {
            frame,
            snapshot,
            camera,
            buffer,
        })
        .map_err(|_| SortError::BackgroundWorker("worker disconnected".into()))?;
        self.in_flight = Some(frame);
        Ok(true)
    }

    /// Takes the finished rebuild without blocking. `None` when idle or
    /// still running.
    pub fn poll(&mut self) -> SortResult<Option<CompletedRefresh>> {
        if self.in_flight.is_none() {
            return Ok(None);
        }
        match self.done.try_recv() {
            Ok(completed) => {
                self.in_flight = None;
                Ok(Some(completed))
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(SortError::BackgroundWorker(
                "worker exited mid-rebuild".into(),
            )),
        }
    }

    /// Blocks until the running rebuild finishes. `None` when idle.
    pub fn wait(&mut self) -> SortResult<Option<CompletedRefresh>> {
        if self.in_flight.is_none() {
            return Ok(None);
        }
        let completed = self
            .done
            .recv()
            .map_err(|_| SortError::BackgroundWorker("worker exited mid-rebuild".into()))?;
        self.in_flight = None;
        Ok(Some(completed))
    }

    /// Hands a buffer back for the next rebuild.
    pub fn restore(&mut self, buffer: GenerationBuffer) {
        debug_assert!(self.staging.is_none());
        self.staging = Some(buffer);
    }
}

impl Drop for BackgroundRefresh {
    fn drop(&mut self) {
        // Closing the job channel ends the worker loop.
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Background refresh worker panicked");
            }
        }
    }
}
