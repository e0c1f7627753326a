//! テスト用のリモートエージェント
//!
//! 送信されたリクエストを記録し、リプライを `MessageLoop` にポストします。
//! メモリ読み取りは登録済みの領域から応答し、必要に応じて保留できます。

use crate::{
    AddOrChangeBreakpointReply, AddOrChangeBreakpointRequest, AttachReply, AttachRequest,
    Callback, DetachReply, DetachRequest, IpcError, JobFilterReply, JobFilterRequest, Koid,
    LaunchReply, LaunchRequest, MemoryBlock, MessageLoop, PauseReply, PauseRequest,
    ProcessTreeRecord, ProcessTreeReply, ProcessTreeRequest, ReadMemoryReply, ReadMemoryRequest,
    RemoteApi, RemoveBreakpointReply, RemoveBreakpointRequest, ResumeReply, ResumeRequest, Result,
};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

/// 記録されたリクエスト
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedRequest {
    ProcessTree,
    Launch(LaunchRequest),
    Attach(AttachRequest),
    Detach(DetachRequest),
    Pause(PauseRequest),
    Resume(ResumeRequest),
    ReadMemory(ReadMemoryRequest),
    AddOrChangeBreakpoint(AddOrChangeBreakpointRequest),
    RemoveBreakpoint(RemoveBreakpointRequest),
    JobFilter(JobFilterRequest),
}

/// テスト用の `RemoteApi` 実装
pub struct MockRemoteApi {
    message_loop: MessageLoop,
    requests: RefCell<Vec<RecordedRequest>>,
    connected: Cell<bool>,
    next_launch_koid: Cell<Koid>,
    launch_status: Cell<i32>,
    attach_status: Cell<i32>,
    memory: RefCell<BTreeMap<u64, Vec<u8>>>,
    defer_reads: Cell<bool>,
    pending_reads: RefCell<Vec<(ReadMemoryRequest, Callback<ReadMemoryReply>)>>,
}

impl MockRemoteApi {
    /// モックを作成する。リプライは `message_loop` にポストされる
    pub fn new(message_loop: MessageLoop) -> Self {
        Self {
            message_loop,
            requests: RefCell::new(Vec::new()),
            connected: Cell::new(true),
            next_launch_koid: Cell::new(1000),
            launch_status: Cell::new(0),
            attach_status: Cell::new(0),
            memory: RefCell::new(BTreeMap::new()),
            defer_reads: Cell::new(false),
            pending_reads: RefCell::new(Vec::new()),
        }
    }

    /// 接続状態を切り替える。切断中のリクエストは `ConnectionLost` で失敗する
    pub fn set_connected(&self, connected: bool) {
        self.connected.set(connected);
    }

    /// 次の Launch で返すプロセスkoid
    pub fn set_next_launch_koid(&self, koid: Koid) {
        self.next_launch_koid.set(koid);
    }

    pub fn set_launch_status(&self, status: i32) {
        self.launch_status.set(status);
    }

    pub fn set_attach_status(&self, status: i32) {
        self.attach_status.set(status);
    }

    /// メモリ領域を登録する
    pub fn map_memory(&self, address: u64, data: Vec<u8>) {
        self.memory.borrow_mut().insert(address, data);
    }

    /// メモリ読み取りを保留するかどうか
    pub fn set_defer_reads(&self, defer: bool) {
        self.defer_reads.set(defer);
    }

    /// 保留中のメモリ読み取り数
    pub fn pending_read_count(&self) -> usize {
        self.pending_reads.borrow().len()
    }

    /// 保留中のメモリ読み取りにすべて応答する
    pub fn complete_pending_reads(&self) {
        let pending = std::mem::take(&mut *self.pending_reads.borrow_mut());
        for (request, cb) in pending {
            let reply = self.build_read_reply(&request);
            self.message_loop.post_task(move || cb(Ok(reply)));
        }
    }

    /// 記録されたリクエストのコピー
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.borrow().clone()
    }

    /// 記録されたリクエストを取り出して消去する
    pub fn take_requests(&self) -> Vec<RecordedRequest> {
        std::mem::take(&mut *self.requests.borrow_mut())
    }

    /// 記録済みの Resume リクエスト
    pub fn resume_requests(&self) -> Vec<ResumeRequest> {
        self.requests
            .borrow()
            .iter()
            .filter_map(|r| match r {
                RecordedRequest::Resume(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, request: RecordedRequest) {
        self.requests.borrow_mut().push(request);
    }

    fn reply<T: 'static>(&self, cb: Callback<T>, result: Result<T>) {
        let result = if self.connected.get() {
            result
        } else {
            tracing::warn!("Request sent to a disconnected agent");
            Err(IpcError::ConnectionLost)
        };
        self.message_loop.post_task(move || cb(result));
    }

    fn build_read_reply(&self, request: &ReadMemoryRequest) -> ReadMemoryReply {
        let memory = self.memory.borrow();
        let end = request.address.saturating_add(u64::from(request.size));
        let mut cursor = request.address;
        let mut blocks = Vec::new();

        while cursor < end {
            let containing = memory
                .range(..=cursor)
                .next_back()
                .filter(|(start, data)| cursor < **start + data.len() as u64);
            match containing {
                Some((start, data)) => {
                    let block_end = (*start + data.len() as u64).min(end);
                    let from = (cursor - *start) as usize;
                    let to = (block_end - *start) as usize;
                    blocks.push(MemoryBlock::mapped(cursor, data[from..to].to_vec()));
                    cursor = block_end;
                }
                None => {
                    let next_start = memory
                        .range(cursor + 1..)
                        .next()
                        .map(|(start, _)| *start)
                        .unwrap_or(end)
                        .min(end);
                    blocks.push(MemoryBlock::unmapped(cursor, next_start - cursor));
                    cursor = next_start;
                }
            }
        }

        ReadMemoryReply { blocks }
    }
}

impl RemoteApi for MockRemoteApi {
    fn process_tree(&self, _request: ProcessTreeRequest, cb: Callback<ProcessTreeReply>) {
        self.record(RecordedRequest::ProcessTree);
        let root = ProcessTreeRecord {
            koid: 1,
            name: "root".to_string(),
            is_job: true,
            children: Vec::new(),
        };
        self.reply(cb, Ok(ProcessTreeReply { root }));
    }

    fn launch(&self, request: LaunchRequest, cb: Callback<LaunchReply>) {
        let name = request.argv.first().cloned().unwrap_or_default();
        self.record(RecordedRequest::Launch(request));
        let koid = self.next_launch_koid.get();
        self.next_launch_koid.set(koid + 1);
        let reply = LaunchReply {
            status: self.launch_status.get(),
            process_koid: koid,
            process_name: name,
        };
        self.reply(cb, Ok(reply));
    }

    fn attach(&self, request: AttachRequest, cb: Callback<AttachReply>) {
        let koid = request.koid;
        self.record(RecordedRequest::Attach(request));
        let reply = AttachReply {
            status: self.attach_status.get(),
            koid,
            name: format!("process-{}", koid),
        };
        self.reply(cb, Ok(reply));
    }

    fn detach(&self, request: DetachRequest, cb: Callback<DetachReply>) {
        self.record(RecordedRequest::Detach(request));
        self.reply(cb, Ok(DetachReply::default()));
    }

    fn pause(&self, request: PauseRequest, cb: Callback<PauseReply>) {
        self.record(RecordedRequest::Pause(request));
        self.reply(cb, Ok(PauseReply::default()));
    }

    fn resume(&self, request: ResumeRequest, cb: Callback<ResumeReply>) {
        self.record(RecordedRequest::Resume(request));
        self.reply(cb, Ok(ResumeReply::default()));
    }

    fn read_memory(&self, request: ReadMemoryRequest, cb: Callback<ReadMemoryReply>) {
        self.record(RecordedRequest::ReadMemory(request));
        if !self.connected.get() {
            self.reply(cb, Err(IpcError::ConnectionLost));
        } else if self.defer_reads.get() {
            self.pending_reads.borrow_mut().push((request, cb));
        } else {
            let reply = self.build_read_reply(&request);
            self.reply(cb, Ok(reply));
        }
    }

    fn add_or_change_breakpoint(
        &self,
        request: AddOrChangeBreakpointRequest,
        cb: Callback<AddOrChangeBreakpointReply>,
    ) {
        self.record(RecordedRequest::AddOrChangeBreakpoint(request));
        self.reply(cb, Ok(AddOrChangeBreakpointReply::default()));
    }

    fn remove_breakpoint(&self, request: RemoveBreakpointRequest, cb: Callback<RemoveBreakpointReply>) {
        self.record(RecordedRequest::RemoveBreakpoint(request));
        self.reply(cb, Ok(RemoveBreakpointReply::default()));
    }

    fn job_filter(&self, request: JobFilterRequest, cb: Callback<JobFilterReply>) {
        self.record(RecordedRequest::JobFilter(request));
        self.reply(cb, Ok(JobFilterReply::default()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryDump;
    use std::rc::Rc;

    fn read(mock: &MockRemoteApi, message_loop: &MessageLoop, address: u64, size: u32) -> MemoryDump {
        let out = Rc::new(RefCell::new(None));
        let out_cb = out.clone();
        mock.read_memory(
            ReadMemoryRequest {
                process_koid: 1,
                address,
                size,
            },
            Box::new(move |reply| *out_cb.borrow_mut() = Some(reply)),
        );
        message_loop.run_until_idle();
        let reply = out.borrow_mut().take().unwrap().unwrap();
        MemoryDump::from(reply)
    }

    #[test]
    fn test_read_spanning_hole() {
        let message_loop = MessageLoop::new();
        let mock = MockRemoteApi::new(message_loop.clone());
        mock.map_memory(0x1000, vec![1, 2, 3, 4]);
        mock.map_memory(0x1008, vec![5, 6]);

        let dump = read(&mock, &message_loop, 0x1002, 10);
        let blocks = dump.blocks();
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0], MemoryBlock::mapped(0x1002, vec![3, 4]));
        assert_eq!(blocks[1], MemoryBlock::unmapped(0x1004, 4));
        assert_eq!(blocks[2], MemoryBlock::mapped(0x1008, vec![5, 6]));
        assert_eq!(blocks[3], MemoryBlock::unmapped(0x100a, 2));
        assert_eq!(dump.size(), 10);
    }

    #[test]
    fn test_read_unmapped_tail() {
        let message_loop = MessageLoop::new();
        let mock = MockRemoteApi::new(message_loop.clone());
        mock.map_memory(0x10, vec![0xaa; 4]);

        let dump = read(&mock, &message_loop, 0x10, 8);
        assert_eq!(dump.blocks().len(), 2);
        assert!(!dump.blocks()[1].valid);
        assert_eq!(dump.size(), 8);
    }

    #[test]
    fn test_deferred_reads_wait_for_completion() {
        let message_loop = MessageLoop::new();
        let mock = MockRemoteApi::new(message_loop.clone());
        mock.set_defer_reads(true);
        mock.map_memory(0, vec![7; 8]);

        let done = Rc::new(Cell::new(false));
        let done_cb = done.clone();
        mock.read_memory(
            ReadMemoryRequest {
                process_koid: 1,
                address: 0,
                size: 8,
            },
            Box::new(move |_| done_cb.set(true)),
        );
        message_loop.run_until_idle();
        assert!(!done.get());
        assert_eq!(mock.pending_read_count(), 1);

        mock.complete_pending_reads();
        message_loop.run_until_idle();
        assert!(done.get());
    }

    #[test]
    fn test_disconnected_requests_fail() {
        let message_loop = MessageLoop::new();
        let mock = MockRemoteApi::new(message_loop.clone());
        mock.set_connected(false);

        let result = Rc::new(RefCell::new(None));
        let result_cb = result.clone();
        mock.pause(
            PauseRequest::default(),
            Box::new(move |r| *result_cb.borrow_mut() = Some(r)),
        );
        message_loop.run_until_idle();
        assert_eq!(
            result.borrow_mut().take(),
            Some(Err(IpcError::ConnectionLost))
        );
        assert_eq!(mock.requests(), vec![RecordedRequest::Pause(PauseRequest::default())]);
    }
}
