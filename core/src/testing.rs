//! In-memory collaborators for host tests
//!
//! Every fake can share one [`EventLog`], so tests can assert the order in
//! which the pipeline touches the network, the panel, the filesystem and the
//! power line.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::convert::Infallible;
use core::net::{IpAddr, Ipv4Addr, SocketAddr};
use core::time::Duration;

use embedded_io_async::ErrorKind;
use embedded_nal_async::{AddrType, Dns, TcpConnect};

use crate::display::{Display, DisplayError};
use crate::network::{JoinError, Network};
use crate::pbm::Bitmap;
use crate::storage::{OpenMode, Storage, StorageError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Join { ssid: String },
    Release,
    Connect(SocketAddr),
    ConnectionClosed,
    DisplayInit,
    Render { width: u32, height: u32 },
    DisplayDelay(u32),
    DisplaySleep,
    Renamed { from: String, to: String },
    PowerDown,
}

pub type EventLog = Rc<RefCell<Vec<Event>>>;

pub fn event_log() -> EventLog {
    Rc::new(RefCell::new(Vec::new()))
}

fn record(events: &Option<EventLog>, event: Event) {
    if let Some(events) = events {
        events.borrow_mut().push(event);
    }
}

// ---------------------------------------------------------------------------
// Storage

pub struct MemFile {
    id: usize,
    path: String,
    pos: usize,
    writable: bool,
}

/// Flat map of files plus a set of directories. The root always exists.
#[derive(Default)]
pub struct MemStorage {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    next_handle: usize,
    open: BTreeSet<usize>,
    watched: Option<String>,
    observations: Vec<Option<Vec<u8>>>,
    fail_reads: BTreeSet<String>,
    fail_writes: BTreeSet<String>,
    fail_removes: BTreeSet<String>,
    events: Option<EventLog>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: &EventLog) -> Self {
        Self {
            events: Some(events.clone()),
            ..Self::default()
        }
    }

    /// Create or replace a file, along with any missing parent directories
    pub fn insert(&mut self, path: &str, data: &[u8]) {
        let mut prefix = String::new();
        let (dir, _) = path.rsplit_once('/').unwrap_or(("", path));
        for part in dir.split('/').filter(|part| !part.is_empty()) {
            prefix.push('/');
            prefix.push_str(part);
            self.dirs.insert(prefix.clone());
        }
        self.files.insert(path.to_owned(), data.to_vec());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.files.get(path).cloned()
    }

    pub fn contents_str(&self, path: &str) -> Option<String> {
        self.contents(path).and_then(|bytes| String::from_utf8(bytes).ok())
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.dirs.contains(path)
    }

    pub fn open_handles(&self) -> usize {
        self.open.len()
    }

    /// Snapshot `path` after every mutating operation from now on
    pub fn watch(&mut self, path: &str) {
        self.watched = Some(path.to_owned());
        self.observations.clear();
    }

    pub fn observations(&self) -> Vec<Option<Vec<u8>>> {
        self.observations.clone()
    }

    pub fn fail_reads_of(&mut self, path: &str) {
        self.fail_reads.insert(path.to_owned());
    }

    pub fn fail_writes_to(&mut self, path: &str) {
        self.fail_writes.insert(path.to_owned());
    }

    pub fn fail_removes_of(&mut self, path: &str) {
        self.fail_removes.insert(path.to_owned());
    }

    fn observe(&mut self) {
        if let Some(path) = &self.watched {
            let state = self.files.get(path).cloned();
            self.observations.push(state);
        }
    }

    fn parent_exists(&self, path: &str) -> bool {
        match path.rsplit_once('/') {
            Some(("", _)) => true,
            Some((dir, _)) => self.dirs.contains(dir),
            None => false,
        }
    }
}

impl Storage for MemStorage {
    type File = MemFile;

    fn open(&mut self, path: &str, mode: OpenMode) -> Result<MemFile, StorageError> {
        if !path.starts_with('/') || path.ends_with('/') {
            return Err(StorageError::InvalidPath);
        }
        if !self.parent_exists(path) {
            return Err(StorageError::NotFound);
        }
        match mode {
            OpenMode::Read if !self.files.contains_key(path) => return Err(StorageError::NotFound),
            OpenMode::Read => {}
            OpenMode::Truncate => {
                self.files.insert(path.to_owned(), Vec::new());
                self.observe();
            }
        }

        let id = self.next_handle;
        self.next_handle += 1;
        self.open.insert(id);
        Ok(MemFile {
            id,
            path: path.to_owned(),
            pos: 0,
            writable: mode == OpenMode::Truncate,
        })
    }

    fn read(&mut self, file: &mut MemFile, buf: &mut [u8]) -> Result<usize, StorageError> {
        if self.fail_reads.contains(&file.path) {
            return Err(StorageError::Read);
        }
        let data = self.files.get(&file.path).ok_or(StorageError::NotFound)?;
        let remaining = data.get(file.pos..).unwrap_or(&[]);
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        file.pos += n;
        Ok(n)
    }

    fn write(&mut self, file: &mut MemFile, data: &[u8]) -> Result<(), StorageError> {
        if !file.writable || self.fail_writes.contains(&file.path) {
            return Err(StorageError::Write);
        }
        self.files
            .get_mut(&file.path)
            .ok_or(StorageError::NotFound)?
            .extend_from_slice(data);
        self.observe();
        Ok(())
    }

    fn close(&mut self, file: MemFile) -> Result<(), StorageError> {
        self.open.remove(&file.id);
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<(), StorageError> {
        if self.fail_removes.contains(path) {
            return Err(StorageError::Filesystem);
        }
        self.files.remove(path).ok_or(StorageError::NotFound)?;
        self.observe();
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), StorageError> {
        if self.files.contains_key(to) {
            return Err(StorageError::AlreadyExists);
        }
        if !self.parent_exists(to) {
            return Err(StorageError::NotFound);
        }
        let data = self.files.remove(from).ok_or(StorageError::NotFound)?;
        self.files.insert(to.to_owned(), data);
        record(
            &self.events,
            Event::Renamed {
                from: from.to_owned(),
                to: to.to_owned(),
            },
        );
        self.observe();
        Ok(())
    }

    fn make_dir(&mut self, path: &str) -> Result<(), StorageError> {
        if self.dirs.contains(path) {
            return Err(StorageError::AlreadyExists);
        }
        if !self.parent_exists(path) {
            return Err(StorageError::NotFound);
        }
        self.dirs.insert(path.to_owned());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Network

/// Connection that replays a canned response and records the request
pub struct ScriptedStream {
    response: Vec<u8>,
    pos: usize,
    chunk: usize,
    fail_after: Option<usize>,
    written: Rc<RefCell<Vec<u8>>>,
    events: Option<EventLog>,
}

impl ScriptedStream {
    /// Reads hand out at most `chunk` bytes at a time
    pub fn new(response: &[u8], chunk: usize) -> Self {
        Self {
            response: response.to_vec(),
            pos: 0,
            chunk,
            fail_after: None,
            written: Rc::new(RefCell::new(Vec::new())),
            events: None,
        }
    }

    /// Reset the connection once `bytes` of the response have been read
    pub fn fail_after(mut self, bytes: usize) -> Self {
        self.fail_after = Some(bytes);
        self
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.borrow().clone()
    }
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        record(&self.events, Event::ConnectionClosed);
    }
}

impl embedded_io_async::ErrorType for ScriptedStream {
    type Error = ErrorKind;
}

impl embedded_io_async::Read for ScriptedStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ErrorKind> {
        let mut end = self.response.len().min(self.pos + self.chunk);
        if let Some(limit) = self.fail_after {
            if self.pos >= limit {
                return Err(ErrorKind::ConnectionReset);
            }
            end = end.min(limit);
        }
        let n = (end - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.response[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl embedded_io_async::Write for ScriptedStream {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, ErrorKind> {
        self.written.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), ErrorKind> {
        Ok(())
    }
}

/// Hands out one scripted connection
pub struct MockTcp {
    stream: RefCell<Option<ScriptedStream>>,
    request: Rc<RefCell<Vec<u8>>>,
    remote: Cell<Option<SocketAddr>>,
    events: Option<EventLog>,
}

impl MockTcp {
    pub fn new(stream: ScriptedStream) -> Self {
        Self {
            request: stream.written.clone(),
            stream: RefCell::new(Some(stream)),
            remote: Cell::new(None),
            events: None,
        }
    }

    /// Every connection attempt is refused
    pub fn refusing() -> Self {
        Self {
            stream: RefCell::new(None),
            request: Rc::new(RefCell::new(Vec::new())),
            remote: Cell::new(None),
            events: None,
        }
    }

    pub fn with_events(mut self, events: &EventLog) -> Self {
        self.events = Some(events.clone());
        if let Some(stream) = self.stream.get_mut() {
            stream.events = Some(events.clone());
        }
        self
    }

    pub fn request(&self) -> Vec<u8> {
        self.request.borrow().clone()
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote.get()
    }

    /// Connection not yet handed out
    pub fn unused(&self) -> bool {
        self.stream.borrow().is_some()
    }
}

impl TcpConnect for MockTcp {
    type Error = ErrorKind;
    type Connection<'a>
        = ScriptedStream
    where
        Self: 'a;

    async fn connect<'a>(
        &'a self,
        remote: SocketAddr,
    ) -> Result<Self::Connection<'a>, Self::Error> {
        record(&self.events, Event::Connect(remote));
        self.remote.set(Some(remote));
        self.stream
            .borrow_mut()
            .take()
            .ok_or(ErrorKind::ConnectionRefused)
    }
}

/// Fixed host table
#[derive(Default)]
pub struct MockDns {
    hosts: Vec<(String, Ipv4Addr)>,
    lookups: Cell<usize>,
}

impl MockDns {
    pub fn with_host(mut self, host: &str, addr: Ipv4Addr) -> Self {
        self.hosts.push((host.to_owned(), addr));
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.get()
    }
}

impl Dns for MockDns {
    type Error = ErrorKind;

    async fn get_host_by_name(&self, host: &str, _addr_type: AddrType) -> Result<IpAddr, ErrorKind> {
        self.lookups.set(self.lookups.get() + 1);
        self.hosts
            .iter()
            .find(|(name, _)| name == host)
            .map(|(_, addr)| IpAddr::V4(*addr))
            .ok_or(ErrorKind::NotFound)
    }

    async fn get_host_by_address(&self, _addr: IpAddr, _result: &mut [u8]) -> Result<usize, ErrorKind> {
        Err(ErrorKind::Unsupported)
    }
}

pub struct MockNetwork {
    tcp: MockTcp,
    dns: MockDns,
    join_result: Result<(), JoinError>,
    joined: bool,
    pub join_timeout: Option<Duration>,
    events: Option<EventLog>,
}

impl MockNetwork {
    pub fn new(tcp: MockTcp, events: &EventLog) -> Self {
        Self {
            tcp: tcp.with_events(events),
            dns: MockDns::default(),
            join_result: Ok(()),
            joined: false,
            join_timeout: None,
            events: Some(events.clone()),
        }
    }

    pub fn with_dns(mut self, dns: MockDns) -> Self {
        self.dns = dns;
        self
    }

    pub fn failing_join(mut self, error: JoinError) -> Self {
        self.join_result = Err(error);
        self
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }
}

impl Network for MockNetwork {
    type Tcp = MockTcp;
    type Dns = MockDns;

    async fn join(&mut self, ssid: &str, _secret: &str, timeout: Duration) -> Result<(), JoinError> {
        record(&self.events, Event::Join { ssid: ssid.to_owned() });
        self.join_timeout = Some(timeout);
        self.join_result?;
        self.joined = true;
        Ok(())
    }

    fn address(&self) -> Option<Ipv4Addr> {
        self.joined.then(|| Ipv4Addr::new(192, 168, 1, 50))
    }

    async fn release(&mut self) {
        self.joined = false;
        record(&self.events, Event::Release);
    }

    fn tcp(&self) -> &MockTcp {
        &self.tcp
    }

    fn dns(&self) -> &MockDns {
        &self.dns
    }
}

// ---------------------------------------------------------------------------
// Display and power

#[derive(Default)]
pub struct MockDisplay {
    pub fail_init: bool,
    pub fail_render: bool,
    pub fail_sleep: bool,
    pub rendered: Option<Bitmap>,
    events: Option<EventLog>,
}

impl MockDisplay {
    pub fn new(events: &EventLog) -> Self {
        Self {
            events: Some(events.clone()),
            ..Self::default()
        }
    }
}

impl Display for MockDisplay {
    fn initialize(&mut self) -> Result<(), DisplayError> {
        record(&self.events, Event::DisplayInit);
        if self.fail_init {
            return Err(DisplayError::Timeout);
        }
        Ok(())
    }

    fn render(&mut self, bitmap: &Bitmap) -> Result<(), DisplayError> {
        record(
            &self.events,
            Event::Render {
                width: bitmap.width(),
                height: bitmap.height(),
            },
        );
        if self.fail_render {
            return Err(DisplayError::Interface);
        }
        self.rendered = Some(bitmap.clone());
        Ok(())
    }

    fn delay_ms(&mut self, ms: u32) {
        record(&self.events, Event::DisplayDelay(ms));
    }

    fn sleep(&mut self) -> Result<(), DisplayError> {
        record(&self.events, Event::DisplaySleep);
        if self.fail_sleep {
            return Err(DisplayError::Interface);
        }
        Ok(())
    }
}

/// Power-off line; only the rising edge is recorded
pub struct MockPin {
    pub high: bool,
    events: Option<EventLog>,
}

impl MockPin {
    pub fn new(events: &EventLog) -> Self {
        Self {
            high: false,
            events: Some(events.clone()),
        }
    }
}

impl embedded_hal::digital::ErrorType for MockPin {
    type Error = Infallible;
}

impl embedded_hal::digital::OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        if !self.high {
            record(&self.events, Event::PowerDown);
        }
        self.high = true;
        Ok(())
    }
}
