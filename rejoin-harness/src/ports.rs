//! Port allocation and cluster topology arguments.
//!
//! Ports are chosen by binding ephemeral listeners and releasing them. All
//! listeners are held until every port has been picked, so the ports handed
//! out within one allocation are distinct.

use std::net::TcpListener;

/// Fixed ports owned by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerPorts {
    /// Control channel listener.
    pub control: u16,
    /// Inter-worker data channel listener.
    pub data: u16,
    /// External (management) channel listener.
    pub external: u16,
}

/// Ports for a whole cluster: source inputs plus one set per worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterPorts {
    /// Host the ports were allocated on.
    pub host: String,
    /// Source (input) ports served by the initializer.
    pub sources: Vec<u16>,
    /// Per-worker ports, index 0 is the initializer.
    pub workers: Vec<WorkerPorts>,
}

impl ClusterPorts {
    /// Allocate fresh, distinct ports for `sources` inputs and `workers` workers.
    pub fn allocate(host: &str, sources: usize, workers: usize) -> std::io::Result<Self> {
        let mut ports = free_ports(host, sources + workers * 3)?.into_iter();
        let mut next = || {
            ports
                .next()
                .ok_or_else(|| std::io::Error::other("port allocation exhausted"))
        };

        let mut source_ports = Vec::with_capacity(sources);
        for _ in 0..sources {
            source_ports.push(next()?);
        }

        let mut worker_ports = Vec::with_capacity(workers);
        for _ in 0..workers {
            worker_ports.push(WorkerPorts {
                control: next()?,
                data: next()?,
                external: next()?,
            });
        }

        Ok(Self {
            host: host.to_string(),
            sources: source_ports,
            workers: worker_ports,
        })
    }

    /// `host:port` of the initializer's first source input.
    pub fn primary_source(&self) -> Option<String> {
        self.sources.first().map(|p| self.endpoint(*p))
    }

    /// Comma-separated `host:port` list of all source inputs.
    pub fn sources_arg(&self) -> String {
        self.sources
            .iter()
            .map(|p| self.endpoint(*p))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Format `host:port`.
    pub fn endpoint(&self, port: u16) -> String {
        format!("{}:{}", self.host, port)
    }
}

/// Bind `count` ephemeral listeners on `host`, return their ports, release them.
pub fn free_ports(host: &str, count: usize) -> std::io::Result<Vec<u16>> {
    let listeners = (0..count)
        .map(|_| TcpListener::bind((host, 0)))
        .collect::<std::io::Result<Vec<_>>>()?;

    listeners
        .iter()
        .map(|l| l.local_addr().map(|a| a.port()))
        .collect()
}
