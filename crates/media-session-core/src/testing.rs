//! In-crate mocks for unit tests

use std::io;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::engine::{
    AudioProcessing, EngineEventSink, EngineStartParams, IoDescriptor, StreamEngine, StreamEngineFactory,
    StreamStatistics,
};
use crate::error::{MediaError, Result};
use crate::ports::{PortConfig, BindCheck};
use crate::security::EncryptionParams;
use crate::types::MediaKind;

/// Port check that accepts every port
pub struct OpenPorts;

impl BindCheck for OpenPorts {
    fn try_bind(&self, _ip: IpAddr, _port: u16) -> io::Result<()> {
        Ok(())
    }
}

/// Shared record of what engines were asked to do
#[derive(Default)]
pub struct EngineLog {
    pub calls: Mutex<Vec<String>>,
}

impl EngineLog {
    pub fn count(&self, prefix: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

pub struct MockEngine {
    index: usize,
    log: Arc<EngineLog>,
    fail_start: bool,
    encrypted: bool,
}

#[async_trait]
impl StreamEngine for MockEngine {
    async fn prepare(&mut self, _processing: Option<&AudioProcessing>) -> Result<()> {
        self.log.calls.lock().push(format!("prepare:{}", self.index));
        Ok(())
    }

    async fn start(&mut self, params: &EngineStartParams) -> Result<()> {
        self.log.calls.lock().push(format!("start:{}:{}", self.index, params.local_port));
        if self.fail_start {
            return Err(MediaError::engine(self.index, "start refused"));
        }
        Ok(())
    }

    async fn reconfigure(&mut self, _params: &EngineStartParams) -> Result<()> {
        self.log.calls.lock().push(format!("reconfigure:{}", self.index));
        Ok(())
    }

    async fn set_io(&mut self, _io: &IoDescriptor) -> Result<()> {
        self.log.calls.lock().push(format!("set_io:{}", self.index));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.log.calls.lock().push(format!("stop:{}", self.index));
        Ok(())
    }

    async fn enable_encryption(&mut self, params: &EncryptionParams) -> Result<()> {
        self.log
            .calls
            .lock()
            .push(format!("encrypt:{}:{}", self.index, params.scheme()));
        self.encrypted = true;
        Ok(())
    }

    fn encryption_state(&self) -> bool {
        self.encrypted
    }

    fn statistics(&self) -> StreamStatistics {
        StreamStatistics::default()
    }
}

/// Factory failing binds a given number of times, and starts per kind
#[derive(Default)]
pub struct MockFactory {
    pub log: Arc<EngineLog>,
    pub bind_failures: Mutex<u32>,
    pub fail_start: Mutex<Vec<MediaKind>>,
}

impl StreamEngineFactory for MockFactory {
    fn create(
        &self,
        kind: MediaKind,
        _bind_ip: IpAddr,
        ports: &PortConfig,
        events: EngineEventSink,
    ) -> Result<Box<dyn StreamEngine>> {
        let index = events.stream_index();
        self.log.calls.lock().push(format!("create:{}:{}", index, ports.rtp_port));
        {
            let mut failures = self.bind_failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(MediaError::transport_bind(index, ports.rtp_port, "address in use"));
            }
        }
        Ok(Box::new(MockEngine {
            index,
            log: self.log.clone(),
            fail_start: self.fail_start.lock().contains(&kind),
            encrypted: false,
        }))
    }
}
