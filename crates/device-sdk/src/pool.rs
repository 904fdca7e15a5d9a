//! Worker pool: runs device callbacks off the receive path.
//!
//! Every accepted call joins its device's lane.  A lane runs its calls one at
//! a time, in arrival order, and each call holds one of `workers` semaphore
//! permits while it runs, so a slow device only ever occupies one worker.
//! A lane disappears as soon as it drains.  Every `Invoke` job sends exactly
//! one response, including when the callback fails or panics.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use leda_protocol::envelope::{FIELD_OUTPUT_DATA, FIELD_PROPERTIES};
use leda_protocol::{encode, DeviceAddress, DeviceDatum, ErrorCode};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::task::JoinSet;

use crate::handler::DeviceCallbacks;
use crate::requester::RequestBuilder;
use crate::types::{DeviceError, SdkError};

/// A decoded inbound method call.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    GetProperties { keys: Vec<String> },
    SetProperties { items: Vec<DeviceDatum> },
    CallService { service: String, inputs: Vec<DeviceDatum> },
}

impl DeviceCall {
    fn name(&self) -> &'static str {
        match self {
            DeviceCall::GetProperties { .. } => "getProperty",
            DeviceCall::SetProperties { .. } => "setProperty",
            DeviceCall::CallService { .. } => "callService",
        }
    }
}

#[derive(Debug)]
pub enum Job {
    /// Run a device callback and answer `message_id`.
    Invoke {
        message_id: u32,
        device: DeviceAddress,
        call: DeviceCall,
    },
    /// Hand an unmatched response to the report-reply observer.
    ReportReply { message_id: u32, code: i32 },
}

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub workers: usize,
    pub queue_depth: usize,
    pub service_output_max_count: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            workers: 5,
            queue_depth: 5 * 1024,
            service_output_max_count: 16,
        }
    }
}

struct WorkerContext {
    callbacks: DeviceCallbacks,
    requester: Arc<RequestBuilder>,
    service_output_max_count: usize,
}

#[derive(Default)]
struct PoolState {
    closed: bool,
    /// Accepted jobs that have not started running.
    queued: usize,
    /// Devices with a call running, and the calls waiting behind it.
    lanes: HashMap<DeviceAddress, VecDeque<(u32, DeviceCall)>>,
    tasks: JoinSet<()>,
}

struct Shared {
    ctx: WorkerContext,
    permits: Semaphore,
    queue_depth: usize,
    state: Mutex<PoolState>,
}

pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    pub fn start(
        options: &PoolOptions,
        callbacks: DeviceCallbacks,
        requester: Arc<RequestBuilder>,
    ) -> Self {
        let workers = options.workers.max(1);
        let queue_depth = options.queue_depth.max(1);
        tracing::debug!(workers, queue_depth, "worker pool started");

        Self {
            shared: Arc::new(Shared {
                ctx: WorkerContext {
                    callbacks,
                    requester,
                    service_output_max_count: options.service_output_max_count,
                },
                permits: Semaphore::new(workers),
                queue_depth,
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    /// Queue a job without waiting.  Fails with `AllocationFailure` when
    /// `queue_depth` jobs are already waiting and `Closed` after shutdown.
    /// Must be called inside a tokio runtime.
    pub fn submit(&self, job: Job) -> Result<(), SdkError> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(SdkError::Closed);
        }
        if state.queued >= self.shared.queue_depth {
            tracing::warn!(queued = state.queued, "worker queue full, rejecting job");
            return Err(SdkError::AllocationFailure("worker queue is full".into()));
        }
        state.queued += 1;
        while state.tasks.try_join_next().is_some() {}

        let shared = Arc::clone(&self.shared);
        match job {
            Job::Invoke {
                message_id,
                device,
                call,
            } => {
                if let Some(waiting) = state.lanes.get_mut(&device) {
                    waiting.push_back((message_id, call));
                    return Ok(());
                }
                state.lanes.insert(device.clone(), VecDeque::new());
                state
                    .tasks
                    .spawn(shared.drive_lane(device, message_id, call));
            }
            Job::ReportReply { message_id, code } => {
                state.tasks.spawn(async move {
                    if let Some(_permit) = shared.start_job().await {
                        shared.ctx.report_reply(message_id, code);
                    }
                });
            }
        }
        Ok(())
    }

    /// Devices that currently have a call running or waiting.
    pub fn busy_devices(&self) -> usize {
        self.shared.state.lock().lanes.len()
    }

    /// Stop accepting jobs, let accepted ones finish for up to `grace`, then
    /// abort whatever is still running.
    pub async fn shutdown(&self, grace: Duration) {
        let mut tasks = {
            let mut state = self.shared.state.lock();
            state.closed = true;
            std::mem::take(&mut state.tasks)
        };

        let drained = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                remaining = tasks.len(),
                "worker pool did not drain in time, aborting"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }
}

impl Shared {
    /// Wait for a worker, then count the job as started.
    async fn start_job(&self) -> Option<SemaphorePermit<'_>> {
        let permit = self.permits.acquire().await.ok()?;
        self.state.lock().queued -= 1;
        Some(permit)
    }

    /// Run `message_id` and then every call queued behind it on `device`.
    async fn drive_lane(
        self: Arc<Self>,
        device: DeviceAddress,
        message_id: u32,
        call: DeviceCall,
    ) {
        let mut next = Some((message_id, call));
        while let Some((message_id, call)) = next {
            let Some(_permit) = self.start_job().await else {
                return;
            };
            self.ctx.invoke(message_id, &device, call).await;
            next = self.next_in_lane(&device);
        }
    }

    /// Pop the lane's next call, or retire the lane when it is empty.
    fn next_in_lane(&self, device: &DeviceAddress) -> Option<(u32, DeviceCall)> {
        let mut state = self.state.lock();
        let next = state.lanes.get_mut(device).and_then(VecDeque::pop_front);
        if next.is_none() {
            state.lanes.remove(device);
        }
        next
    }
}

impl WorkerContext {
    fn report_reply(&self, message_id: u32, code: i32) {
        let Some(observer) = &self.callbacks.reply_observer else {
            return;
        };
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
            observer.on_report_reply(message_id, code)
        }));
        if outcome.is_err() {
            tracing::error!(message_id, "report-reply observer panicked");
        }
    }

    async fn invoke(&self, message_id: u32, device: &DeviceAddress, call: DeviceCall) {
        let method = call.name();
        let outcome = AssertUnwindSafe(self.execute(device, call))
            .catch_unwind()
            .await;

        let (code, payload) = match outcome {
            Ok(Ok(payload)) => (ErrorCode::Success.code(), payload),
            Ok(Err(e)) => {
                tracing::warn!(
                    message_id,
                    method,
                    device = %device,
                    code = e.code.code(),
                    error = %e.message,
                    "device callback failed"
                );
                (e.code.code(), Map::new())
            }
            Err(_panic) => {
                tracing::error!(message_id, method, device = %device, "device callback panicked");
                (ErrorCode::Unknown.code(), Map::new())
            }
        };

        if let Err(e) = self.requester.respond(message_id, code, payload) {
            tracing::warn!(message_id, method, error = %e, "failed to send response");
        }
    }

    async fn execute(
        &self,
        device: &DeviceAddress,
        call: DeviceCall,
    ) -> Result<Map<String, Value>, DeviceError> {
        let handler = &self.callbacks.handler;
        let mut payload = Map::new();
        match call {
            DeviceCall::GetProperties { keys } => {
                let values = handler.get_properties(device, &keys).await?;
                payload.insert(FIELD_PROPERTIES.into(), encode_reply(&values)?);
            }
            DeviceCall::SetProperties { items } => {
                // In order, stop at the first rejection; no rollback.
                for item in &items {
                    handler.set_property(device, item).await?;
                }
            }
            DeviceCall::CallService { service, inputs } => {
                let mut outputs = vec![DeviceDatum::default(); self.service_output_max_count];
                handler
                    .call_service(device, &service, &inputs, &mut outputs)
                    .await?;
                let used = outputs
                    .iter()
                    .position(DeviceDatum::is_empty)
                    .unwrap_or(outputs.len());
                payload.insert(FIELD_OUTPUT_DATA.into(), encode_reply(&outputs[..used])?);
            }
        }
        Ok(payload)
    }
}

fn encode_reply(data: &[DeviceDatum]) -> Result<Value, DeviceError> {
    for datum in data {
        datum.check_limits().map_err(DeviceError::invalid_parameter)?;
    }
    encode(data).map_err(|e| DeviceError::new(e.code(), e.to_string()))
}
