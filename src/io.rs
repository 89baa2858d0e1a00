use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;

use crate::buffer::Buffer;
use crate::device::BlockDev;

enum IoReq {
    Read(Buffer),
    Write(Buffer, Vec<u8>),
    Shutdown,
}

/// Asynchronous I/O front end. Submitting a request marks the buffer
/// in flight; a worker thread performs the device operation, settles
/// the buffer's flags, and wakes anyone blocked in `Buffer::wait_io`.
pub(crate) struct IoDispatcher {
    tx: Sender<IoReq>,
    join_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl IoDispatcher {
    pub(crate) fn start(
        device: Arc<dyn BlockDev>,
        block_size: usize,
    ) -> IoDispatcher {
        let (tx, rx) = unbounded();

        let join_handle = thread::Builder::new()
            .name("gneiss-io".into())
            .spawn(move || run(&rx, &*device, block_size))
            .unwrap();

        IoDispatcher { tx, join_handle: Mutex::new(Some(join_handle)) }
    }

    /// Issue read I/O unless the buffer is already current or already
    /// in flight.
    pub(crate) fn submit_read(&self, buf: &Buffer) {
        {
            let mut state = buf.inner.state.lock();
            if state.uptodate || state.in_flight {
                return;
            }
            state.in_flight = true;
        }
        log::trace!("read submitted for block {}", buf.blkno());
        let _ = self.tx.send(IoReq::Read(buf.clone()));
    }

    /// Issue write-back I/O if the buffer is dirty and idle. Clears
    /// dirty at submission time; a failed write re-marks it so waiters
    /// observe the fault.
    pub(crate) fn submit_write(&self, buf: &Buffer) {
        let data = {
            let mut state = buf.inner.state.lock();
            if !state.dirty || state.in_flight {
                return;
            }
            state.dirty = false;
            state.in_flight = true;
            state.data.clone()
        };
        log::trace!("write submitted for block {}", buf.blkno());
        let _ = self.tx.send(IoReq::Write(buf.clone(), data));
    }
}

impl Drop for IoDispatcher {
    fn drop(&mut self) {
        let _ = self.tx.send(IoReq::Shutdown);
        if let Some(handle) = self.join_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

fn run(rx: &Receiver<IoReq>, device: &dyn BlockDev, block_size: usize) {
    let mut scratch = vec![0; block_size];

    while let Ok(req) = rx.recv() {
        match req {
            IoReq::Read(buf) => {
                let res = device.read_block(buf.blkno(), &mut scratch);
                let mut state = buf.inner.state.lock();
                match res {
                    Ok(()) => {
                        state.data.copy_from_slice(&scratch);
                        state.uptodate = true;
                    }
                    Err(e) => {
                        log::error!(
                            "read of block {} failed: {}",
                            buf.blkno(),
                            e
                        );
                    }
                }
                state.in_flight = false;
                drop(state);
                buf.inner.io_done.notify_all();
            }
            IoReq::Write(buf, data) => {
                let res = device.write_block(buf.blkno(), &data);
                let mut state = buf.inner.state.lock();
                if let Err(e) = res {
                    log::error!(
                        "write of block {} failed: {}",
                        buf.blkno(),
                        e
                    );
                    state.dirty = true;
                }
                state.in_flight = false;
                drop(state);
                buf.inner.io_done.notify_all();
            }
            IoReq::Shutdown => break,
        }
    }
}
