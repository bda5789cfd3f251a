// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The scheduler loop.
//!
//! A single-threaded reactor: one blocking multiplexer wait per
//! iteration, then strictly ordered dispatch. Within an iteration a
//! client's read is attempted before its write, which is attempted before
//! idle-close, so a pending write cannot be missed in the tick its read
//! completes. Child reaping precedes reload evaluation so a crash during
//! reload quiesce is observed.

use crate::cert::{CertError, CertStore};
use crate::client::Advance;
use crate::config::{Config, ConfigError};
use crate::fdset::{FdOwner, Interest};
use crate::poller::{self, PollerError, Ready, Wait};
use crate::reaper;
use crate::signal::SignalBridge;
use crate::spawn::{self, PipelineArgs};
use crate::state::DaemonState;
use spoold_core::{Clock, JobId, JobState, MAX_TIMEOUT, MIN_TIMEOUT};
use std::collections::HashMap;
use std::io::Read;
use std::os::unix::io::AsRawFd;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Pending multi-document job rescan cadence, seconds.
const CHECK_JOBS_INTERVAL: u64 = 10;

/// Client count past which the loop stops optimising its timeout.
const BUSY_CLIENT_THRESHOLD: usize = 50;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("configuration reload failed: {0}")]
    Reload(#[from] ConfigError),
    #[error("multiplexer failed: {0}")]
    Poller(#[from] PollerError),
    #[error("certificate store failed: {0}")]
    Cert(#[from] CertError),
}

enum Tick {
    Continue,
    Stop,
}

pub struct Scheduler<C: Clock> {
    clock: C,
    signals: SignalBridge,
    pub state: DaemonState,
    certs: CertStore,
    need_reload: bool,
    reload_at: u64,
    check_jobs_time: u64,
    stats_time: u64,
    /// The previous wait returned at least one ready descriptor
    prev_ready: bool,
    /// Per-job partial status lines awaiting their newline
    status_buffers: HashMap<JobId, Vec<u8>>,
}

impl<C: Clock> Scheduler<C> {
    pub fn new(
        clock: C,
        mut state: DaemonState,
        signals: SignalBridge,
        certs: CertStore,
    ) -> Self {
        state
            .registry
            .register(signals.read_fd(), FdOwner::SelfPipe, Interest::READ);
        let now = clock.now();
        Self {
            clock,
            signals,
            state,
            certs,
            need_reload: false,
            reload_at: 0,
            check_jobs_time: now,
            stats_time: now,
            prev_ready: true,
            status_buffers: HashMap::new(),
        }
    }

    /// Loop until a stop is requested or a fatal error occurs.
    pub fn run(&mut self) -> Result<(), SchedulerError> {
        self.check_jobs(self.clock.now());
        loop {
            match self.iterate()? {
                Tick::Continue => {}
                Tick::Stop => {
                    self.shutdown();
                    return Ok(());
                }
            }
        }
    }

    fn iterate(&mut self) -> Result<Tick, SchedulerError> {
        let now = self.clock.now();

        let flags = self.signals.drain();
        if flags.stop_scheduler {
            return Ok(Tick::Stop);
        }

        if flags.dead_children {
            reaper::reap(&mut self.state.jobs, &mut self.state.printers, now);
            self.finalize_jobs();
        }

        if flags.need_reload {
            info!("reload requested");
            self.need_reload = true;
            self.reload_at = now;
        }
        if self.need_reload {
            self.step_reload(now)?;
        }

        let timeout = self.select_timeout(now);
        self.sync_client_interest();
        let snapshot = self.state.registry.snapshot();

        let mut ready = match poller::wait(&snapshot, timeout) {
            Ok(Wait::Ready(ready)) => ready,
            Ok(Wait::Interrupted) => {
                // A zero-work tick; the drained flags act next iteration.
                self.prev_ready = false;
                return Ok(Tick::Continue);
            }
            Err(e) => {
                self.dump_diagnostics();
                return Err(e.into());
            }
        };
        self.prev_ready = !ready.is_empty();

        let now = self.clock.now();

        self.step_accept(&ready, now);
        self.step_clients(&ready, now);
        self.step_job_pipes(&mut ready, now);
        self.step_cgi(&ready);
        self.step_browse(&ready, now);
        self.run_timers(now);

        Ok(Tick::Continue)
    }

    /// Adaptive wait: the earliest of the candidate deadlines, as a
    /// relative delay within [1, 86400] seconds.
    fn select_timeout(&self, now: u64) -> u64 {
        // Buffered client input is work we already have.
        if self
            .state
            .clients
            .values()
            .any(|c| c.has_buffered_input())
        {
            return 0;
        }

        // Under load, don't bother optimising.
        if self.prev_ready || self.state.clients.len() > BUSY_CLIENT_THRESHOLD {
            return 1;
        }

        let mut deadline = now + MAX_TIMEOUT;
        let mut why = "do nothing";

        for client in self.state.clients.values() {
            let idle_deadline = client.activity + self.state.config.timeout;
            if idle_deadline < deadline {
                deadline = idle_deadline;
                why = "timeout a client connection";
            }
        }

        if let Some(browse) = &self.state.browse {
            if let Some(browse_deadline) = browse.next_deadline(&self.state.printers) {
                if browse_deadline < deadline {
                    deadline = browse_deadline;
                    why = "send or expire browse updates";
                }
            }
        }

        if deadline > now + CHECK_JOBS_INTERVAL
            && self
                .state
                .jobs
                .values()
                .any(|j| j.keeps_scheduler_busy())
        {
            deadline = now + CHECK_JOBS_INTERVAL;
            why = "process active jobs";
        }

        if self.state.config.stats_interval > 0 {
            let stats_deadline = self.stats_time + self.state.config.stats_interval;
            if stats_deadline < deadline {
                deadline = stats_deadline;
                why = "log usage stats";
            }
        }

        if self.certs.duration > 0 {
            let cert_deadline = self.certs.root_cert_time + self.certs.duration;
            if cert_deadline < deadline {
                deadline = cert_deadline;
                why = "update root certificate";
            }
        }

        // Events fire after their deadline, hence the +1; the clamp keeps
        // the wait inside platform limits.
        let timeout = (deadline.saturating_sub(now) + 1).clamp(MIN_TIMEOUT, MAX_TIMEOUT);
        debug!("select_timeout: {timeout} seconds to {why}");
        timeout
    }

    /// Reload quiesce: close idle clients, stop accepting, and reload
    /// once drained or after the reload timeout. Reload failure is fatal.
    fn step_reload(&mut self, now: u64) -> Result<(), SchedulerError> {
        if !self.state.clients.is_empty() {
            let idle: Vec<u64> = self
                .state
                .clients
                .values()
                .filter(|c| c.is_between_requests())
                .map(|c| c.id)
                .collect();
            for id in idle {
                debug!("closing idle client {id} for reload");
                self.state.remove_client(id);
            }
            for client in self.state.clients.values_mut() {
                client.keepalive = false;
            }
            self.state.pause_listening();
        }

        let processing = self
            .state
            .jobs
            .values()
            .any(|j| j.state == JobState::Processing);

        let quiesced = self.state.clients.is_empty() && !processing;
        let expired = now.saturating_sub(self.reload_at) >= self.state.config.reload_timeout;
        if !quiesced && !expired {
            return Ok(());
        }

        let config = Config::load(&self.state.config_path)?;
        self.state.config = config;
        self.state.apply_printer_config();
        self.state.resume_listening();
        self.need_reload = false;
        info!("configuration reloaded");
        Ok(())
    }

    fn step_accept(&mut self, ready: &Ready, now: u64) {
        if self.state.listening_paused {
            return;
        }
        let fds: Vec<i32> = self.state.listeners.iter().map(|l| l.fd()).collect();
        for (index, fd) in fds.into_iter().enumerate() {
            if !ready.is_readable(fd) {
                continue;
            }
            if self.state.clients.len() >= self.state.config.max_clients {
                warn!("client limit reached; connection left pending");
                break;
            }
            match self.state.listeners[index].accept_one() {
                Ok(Some(stream)) => {
                    let id = self.state.add_client(stream, now);
                    debug!("accepted client {id}");
                }
                Ok(None) => {}
                Err(e) => warn!("accept failed: {e}"),
            }
        }
    }

    fn step_clients(&mut self, ready: &Ready, now: u64) {
        let idle_timeout = self.state.config.timeout;
        let ids: Vec<u64> = self.state.clients.keys().copied().collect();

        for id in ids {
            let mut requests = Vec::new();
            let mut closed = false;

            {
                let Some(client) = self.state.clients.get_mut(&id) else {
                    continue;
                };
                let fd = client.fd();

                if ready.is_readable(fd) || client.has_buffered_input() {
                    if client.read_advance(now) == Advance::Closed {
                        closed = true;
                    } else {
                        requests = client.take_requests();
                    }
                }
            }

            if closed {
                debug!("client {id} disconnected");
                self.state.remove_client(id);
                continue;
            }

            for request in requests {
                self.handle_request(id, &request);
            }

            let mut remove = false;
            {
                let Some(client) = self.state.clients.get_mut(&id) else {
                    continue;
                };
                let fd = client.fd();

                // Filter output is produced-for only as fast as the peer
                // consumes: mark it ready and drop the pipe from the
                // interest set until the client socket reports writable.
                if let Some(file_fd) = client.file_fd() {
                    if ready.is_readable(file_fd) {
                        client.file_ready = true;
                        if !ready.is_writable(fd) {
                            self.state.registry.set_readable(file_fd, false);
                        }
                    }
                }

                if ready.is_writable(fd) && (client.pipe_pid.is_none() || client.file_ready) {
                    if client.write_advance(now) == Advance::Closed {
                        debug!("client {id} finished");
                        remove = true;
                    } else if let Some(file_fd) = client.file_fd() {
                        self.state.registry.set_readable(file_fd, true);
                    }
                }

                if !remove && client.idle_expired(now, idle_timeout) {
                    info!("closing client {id} after {idle_timeout} seconds of inactivity");
                    remove = true;
                }
            }
            if remove {
                self.state.remove_client(id);
            }
        }
    }

    /// The request protocol proper lives with the clients; the scheduler
    /// only answers the administrative line commands.
    fn handle_request(&mut self, client_id: u64, request: &str) {
        let mut fields = request.split_whitespace();
        let reply = match fields.next() {
            Some("status") | None => self.status_reply(),
            Some("print") => {
                let printer = fields.next().unwrap_or_default().to_string();
                let title = fields.collect::<Vec<_>>().join(" ");
                let title: &str = if title.is_empty() { "untitled" } else { &title };
                match self.state.enqueue_job(&printer, title) {
                    Ok(id) => serde_json::json!({ "queued": id.as_u32() }),
                    Err(e) => serde_json::json!({ "error": e.to_string() }),
                }
            }
            Some("cancel") => {
                let id = fields
                    .next()
                    .and_then(|s| s.parse::<u32>().ok())
                    .map(JobId::new);
                match id.and_then(|id| self.state.jobs.get_mut(&id)) {
                    Some(job) if job.state == JobState::Processing => {
                        spawn::cancel_job(job);
                        serde_json::json!({ "cancelled": job.id.as_u32() })
                    }
                    Some(job) if !job.state.is_terminal() => {
                        job.cancelled = true;
                        job.state = JobState::Cancelled;
                        serde_json::json!({ "cancelled": job.id.as_u32() })
                    }
                    _ => serde_json::json!({ "error": "no such active job" }),
                }
            }
            Some(other) => serde_json::json!({ "error": format!("unknown request {other:?}") }),
        };

        if let Some(client) = self.state.clients.get_mut(&client_id) {
            let mut bytes = reply.to_string().into_bytes();
            bytes.push(b'\n');
            client.queue_response(&bytes);
        }
    }

    fn status_reply(&self) -> serde_json::Value {
        let printers: Vec<_> = self
            .state
            .printers
            .values()
            .map(|p| {
                serde_json::json!({
                    "name": p.name,
                    "state": p.state.to_string(),
                    "message": p.state_message,
                    "remote": p.remote,
                })
            })
            .collect();
        let jobs: Vec<_> = self
            .state
            .jobs
            .values()
            .map(|j| {
                serde_json::json!({
                    "id": j.id.as_u32(),
                    "printer": j.printer,
                    "title": j.title,
                    "state": j.state.to_string(),
                })
            })
            .collect();
        serde_json::json!({ "printers": printers, "jobs": jobs })
    }

    fn step_job_pipes(&mut self, ready: &mut Ready, now: u64) {
        let pipes: Vec<(JobId, i32)> = self
            .state
            .job_pipes
            .iter()
            .map(|(&id, pipe)| (id, pipe.as_raw_fd()))
            .collect();

        for (job_id, fd) in pipes {
            if !ready.is_readable(fd) {
                continue;
            }
            // Clear the local ready bit so a descriptor number reused in
            // this same iteration cannot masquerade as this pipe.
            ready.clear_readable(fd);
            self.update_job_status(job_id, now);
        }
    }

    /// Read and apply status lines from a job's filter pipeline.
    fn update_job_status(&mut self, job_id: JobId, now: u64) {
        let mut eof = false;
        let buffer = self.status_buffers.entry(job_id).or_default();

        if let Some(pipe) = self.state.job_pipes.get_mut(&job_id) {
            let mut scratch = [0u8; 2048];
            loop {
                match pipe.read(&mut scratch) {
                    Ok(0) => {
                        eof = true;
                        break;
                    }
                    Ok(n) => buffer.extend_from_slice(&scratch[..n]),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!("status pipe for job {job_id} failed: {e}");
                        eof = true;
                        break;
                    }
                }
            }
        }

        let mut lines = Vec::new();
        while let Some(nl) = buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=nl).collect();
            lines.push(String::from_utf8_lossy(&line).trim_end().to_string());
        }

        let printer_name = self.state.jobs.get(&job_id).map(|j| j.printer.clone());
        for line in lines {
            let printer = printer_name
                .as_ref()
                .and_then(|name| self.state.printers.get_mut(name));
            apply_status_line(&line, job_id, printer, now);
        }

        if eof {
            self.state.retire_job_pipe(job_id);
            self.status_buffers.remove(&job_id);
        }
    }

    fn step_cgi(&mut self, ready: &Ready) {
        let Some(pipe) = self.state.cgi_read.as_mut() else {
            return;
        };
        let fd = pipe.as_raw_fd();
        if !ready.is_readable(fd) {
            return;
        }
        let mut scratch = [0u8; 2048];
        loop {
            match pipe.read(&mut scratch) {
                Ok(0) => break,
                Ok(n) => {
                    for line in String::from_utf8_lossy(&scratch[..n]).lines() {
                        debug!("CGI: {line}");
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }

    fn step_browse(&mut self, ready: &Ready, now: u64) {
        let DaemonState {
            browse, printers, ..
        } = &mut self.state;
        let Some(channel) = browse else {
            return;
        };
        if ready.is_readable(channel.fd()) {
            channel.drain(printers, now);
        }
        channel.send_due(printers, now);
        channel.age_remote(printers, now);
    }

    /// The purely time-driven tail of an iteration: job rescan, stats,
    /// and certificate rotation.
    fn run_timers(&mut self, now: u64) {
        if now.saturating_sub(self.check_jobs_time) >= CHECK_JOBS_INTERVAL {
            self.check_jobs(now);
            self.check_jobs_time = now;
        }

        let stats_interval = self.state.config.stats_interval;
        if stats_interval > 0 && now.saturating_sub(self.stats_time) >= stats_interval {
            debug!(
                clients = self.state.clients.len(),
                jobs = self.state.jobs.len(),
                printers = self.state.printers.len(),
                fds = self.state.registry.len(),
                "usage stats"
            );
            self.stats_time = now;
        }

        if self.certs.needs_rotation(now) {
            if let Err(e) = self.certs.rotate(now) {
                warn!("root certificate rotation failed: {e}");
            }
        }
    }

    /// Launch pending jobs whose printer is ready.
    fn check_jobs(&mut self, now: u64) {
        let candidates: Vec<JobId> = self
            .state
            .jobs
            .values()
            .filter(|j| j.state == JobState::Pending)
            .filter(|j| {
                self.state
                    .printers
                    .get(&j.printer)
                    .is_some_and(|p| p.is_available())
            })
            .map(|j| j.id)
            .collect();

        for id in candidates {
            self.start_job(id, now);
        }
    }

    fn start_job(&mut self, id: JobId, now: u64) {
        let Some((filters, title, printer_name, device_uri)) =
            self.state.jobs.get(&id).and_then(|job| {
                let printer = self.state.printers.get(&job.printer)?;
                Some((
                    job.filters.clone(),
                    job.title.clone(),
                    printer.name.clone(),
                    printer.device_uri.clone(),
                ))
            })
        else {
            return;
        };

        let launch = spawn::launch_pipeline(
            &filters,
            PipelineArgs {
                job_id: id.as_u32(),
                title: &title,
                copies: 1,
                device_uri: &device_uri,
                printer_name: &printer_name,
                spool_file: None,
            },
        );

        match launch {
            Ok(launched) => {
                let fd = launched.status_pipe.as_raw_fd();
                self.state
                    .registry
                    .register(fd, FdOwner::JobStatus(id), Interest::READ);
                self.state.job_pipes.insert(id, launched.status_pipe);
                if let Some(job) = self.state.jobs.get_mut(&id) {
                    job.start(launched.procs, fd);
                }
                if let Some(printer) = self.state.printers.get_mut(&printer_name) {
                    printer.state = spoold_core::PrinterState::Processing;
                }
                info!("job {id} started");
            }
            Err(e) => {
                error!("unable to start job {id}: {e}");
                if let Some(printer) = self.state.printers.get_mut(&printer_name) {
                    printer
                        .set_state_message(format!("Unable to start filter pipeline: {e}"), now);
                    printer.stop();
                }
            }
        }
    }

    fn finalize_jobs(&mut self) {
        let finished = reaper::finalize_jobs(&mut self.state.jobs, &mut self.state.printers);
        for id in finished {
            self.state.retire_job_pipe(id);
            self.status_buffers.remove(&id);
        }
    }

    fn sync_client_interest(&mut self) {
        for client in self.state.clients.values() {
            let wants_write = client.wants_write() || client.file_fd().is_some();
            self.state.registry.set_writable(client.fd(), wants_write);
        }
    }

    /// Snapshot everything the multiplexer could be choking on before a
    /// fatal exit, to make the hang diagnosable from logs alone.
    fn dump_diagnostics(&self) {
        error!("multiplexer failed; dumping descriptor state");
        for (fd, owner, interest) in self.state.registry.describe() {
            error!(
                "  fd {fd}: owner {owner:?} readable={} writable={}",
                interest.readable, interest.writable
            );
        }
        for listener in &self.state.listeners {
            error!("  listener {} = fd {}", listener.address, listener.fd());
        }
        for client in self.state.clients.values() {
            error!(
                "  client {} = fd {}, file {:?}, state {:?}",
                client.id,
                client.fd(),
                client.file_fd(),
                client.state
            );
        }
        for job in self.state.jobs.values() {
            error!("  job {} = pipe {:?}", job.id, job.status_pipe);
        }
        if let Some(browse) = &self.state.browse {
            error!("  browse = fd {}", browse.fd());
        }
        if let Some(cgi) = &self.state.cgi_read {
            error!("  cgi = fd {}", cgi.as_raw_fd());
        }
        error!("  self-pipe = fd {}", self.signals.read_fd());
    }

    /// Stop every job and release the listeners.
    fn shutdown(&mut self) {
        info!("stopping all jobs");
        for job in self.state.jobs.values_mut() {
            if job.state == JobState::Processing {
                spawn::cancel_job(job);
            }
        }
        let ids: Vec<u64> = self.state.clients.keys().copied().collect();
        for id in ids {
            self.state.remove_client(id);
        }
        self.state.pause_listening();
    }
}

/// Apply one filter status line: update the printer's visible state and
/// log at the line's severity.
fn apply_status_line(
    line: &str,
    job_id: JobId,
    printer: Option<&mut spoold_core::Printer>,
    now: u64,
) {
    if let Some(message) = line.strip_prefix("STATE:") {
        if let Some(printer) = printer {
            printer.set_state_message(message.trim().to_string(), now);
        }
    } else if let Some(message) = line.strip_prefix("ERROR:") {
        error!("job {job_id}: {}", message.trim());
        if let Some(printer) = printer {
            printer.set_state_message(message.trim().to_string(), now);
        }
    } else if let Some(message) = line.strip_prefix("INFO:") {
        info!("job {job_id}: {}", message.trim());
        if let Some(printer) = printer {
            printer.set_state_message(message.trim().to_string(), now);
        }
    } else if let Some(page) = line.strip_prefix("PAGE:") {
        info!("job {job_id}: page {}", page.trim());
    } else if !line.is_empty() {
        debug!("job {job_id}: {line}");
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
