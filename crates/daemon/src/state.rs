// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduler state.
//!
//! The catalogues the loop mutates, in one explicit context value.
//! Collections are owned maps addressed by stable id; back references are
//! lookups by id, never pointers.

use crate::browse::BrowseChannel;
use crate::client::{Client, Listener};
use crate::config::Config;
use crate::fdset::{FdOwner, FdRegistry, Interest};
use spoold_core::{Job, JobConfig, JobId, Printer};
use std::collections::{BTreeMap, HashMap};
use std::io::{PipeReader, PipeWriter};
use std::net::TcpStream;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("unable to listen on {address}: {source}")]
    Listen {
        address: String,
        source: std::io::Error,
    },
    #[error("unable to open browse socket: {0}")]
    Browse(std::io::Error),
    #[error("unable to open CGI pipe: {0}")]
    CgiPipe(std::io::Error),
    #[error("unknown printer \"{0}\"")]
    UnknownPrinter(String),
}

pub struct DaemonState {
    pub config: Config,
    pub config_path: PathBuf,
    pub registry: FdRegistry,
    pub listeners: Vec<Listener>,
    pub listening_paused: bool,
    pub clients: BTreeMap<u64, Client>,
    next_client_id: u64,
    pub jobs: BTreeMap<JobId, Job>,
    next_job_id: u32,
    /// Owned read ends of job status pipes, keyed by job
    pub job_pipes: HashMap<JobId, PipeReader>,
    pub printers: BTreeMap<String, Printer>,
    pub browse: Option<BrowseChannel>,
    /// Read end of the CGI pipe; always registered readable
    pub cgi_read: Option<PipeReader>,
    /// Write end, handed to helper children as their stderr
    pub cgi_write: Option<PipeWriter>,
}

impl DaemonState {
    /// Build the state from a loaded configuration: bind listeners, open
    /// the browse socket and CGI pipe, and populate the printer
    /// catalogue.
    pub fn new(config: Config, config_path: PathBuf) -> Result<Self, StateError> {
        let mut registry = FdRegistry::new();

        let mut listeners = Vec::with_capacity(config.listen.len());
        for address in &config.listen {
            let listener = Listener::bind(address).map_err(|source| StateError::Listen {
                address: address.clone(),
                source,
            })?;
            registry.register(listener.fd(), FdOwner::Listener, Interest::READ);
            info!("listening on {address}");
            listeners.push(listener);
        }

        let browse = if config.browsing {
            let channel = BrowseChannel::open(
                config.browse_port,
                config.browse_interval,
                config.browse_timeout,
            )
            .map_err(StateError::Browse)?;
            registry.register(channel.fd(), FdOwner::Browse, Interest::READ);
            Some(channel)
        } else {
            None
        };

        let (cgi_read, cgi_write) = std::io::pipe().map_err(StateError::CgiPipe)?;
        crate::spawn::set_nonblocking(cgi_read.as_raw_fd()).map_err(StateError::CgiPipe)?;
        registry.register(cgi_read.as_raw_fd(), FdOwner::Cgi, Interest::READ);

        let mut state = Self {
            config,
            config_path,
            registry,
            listeners,
            listening_paused: false,
            clients: BTreeMap::new(),
            next_client_id: 1,
            jobs: BTreeMap::new(),
            next_job_id: 1,
            job_pipes: HashMap::new(),
            printers: BTreeMap::new(),
            browse,
            cgi_read: Some(cgi_read),
            cgi_write: Some(cgi_write),
        };
        state.apply_printer_config();
        Ok(state)
    }

    /// (Re)build the local printer catalogue from the configuration,
    /// keeping remote printers learned from browsing.
    pub fn apply_printer_config(&mut self) {
        self.printers.retain(|_, p| p.remote);
        for pc in &self.config.printers {
            let mut printer = Printer::new(pc.name.clone(), pc.device_uri.clone());
            printer.shared = pc.shared;
            // A local definition replaces a same-named remote entry.
            self.printers.insert(pc.name.clone(), printer);
        }
    }

    pub fn add_client(&mut self, stream: TcpStream, now: u64) -> u64 {
        let id = self.next_client_id;
        self.next_client_id += 1;

        let client = Client::new(id, stream, now);
        self.registry
            .register(client.fd(), FdOwner::Client(id), Interest::READ);
        self.clients.insert(id, client);
        id
    }

    /// Deregister a client's descriptors and drop it. The registry entry
    /// goes first so the multiplexer never sees the closed fd.
    pub fn remove_client(&mut self, id: u64) {
        if let Some(client) = self.clients.remove(&id) {
            self.registry.deregister(client.fd());
            if let Some(file_fd) = client.file_fd() {
                self.registry.deregister(file_fd);
            }
        }
    }

    /// Queue a job for a known printer.
    pub fn enqueue_job(&mut self, printer: &str, title: &str) -> Result<JobId, StateError> {
        let filters = self
            .config
            .printers
            .iter()
            .find(|p| p.name == printer)
            .map(|p| p.filters.clone())
            .ok_or_else(|| StateError::UnknownPrinter(printer.to_string()))?;

        let id = JobId::new(self.next_job_id);
        self.next_job_id += 1;

        let job = Job::new(JobConfig {
            id,
            printer: printer.to_string(),
            title: title.to_string(),
            filters,
        });
        info!("job {id} queued on {printer}: \"{title}\"");
        self.jobs.insert(id, job);
        Ok(id)
    }

    /// Retire a job's status pipe: deregister, then close by dropping.
    pub fn retire_job_pipe(&mut self, id: JobId) {
        if let Some(pipe) = self.job_pipes.remove(&id) {
            self.registry.deregister(pipe.as_raw_fd());
        }
        if let Some(job) = self.jobs.get_mut(&id) {
            job.status_pipe = None;
        }
    }

    /// Pause acceptance: listeners drop out of the interest set but stay
    /// bound.
    pub fn pause_listening(&mut self) {
        if self.listening_paused {
            return;
        }
        for listener in &self.listeners {
            self.registry.deregister(listener.fd());
        }
        self.listening_paused = true;
        info!("paused listening");
    }

    pub fn resume_listening(&mut self) {
        if !self.listening_paused {
            return;
        }
        for listener in &self.listeners {
            self.registry
                .register(listener.fd(), FdOwner::Listener, Interest::READ);
        }
        self.listening_paused = false;
        info!("resumed listening");
    }
}
