use std::{
    fs,
    io::{self, BufRead, BufReader, Read},
    mem,
    path::PathBuf,
    thread::{self, JoinHandle},
};

use crossbeam::channel::{Receiver, Sender};
use xz2::read::XzDecoder;

use crate::{error::TraceError, request::Request};

pub type Block = Result<Vec<Request>, TraceError>;

/// Parses a trace on a background thread and hands out blocks of requests.
/// A parse or read error is delivered in place of the next block and ends
/// the stream.
pub struct Trace {
    pub rec: Receiver<Block>,
    _thread: JoinHandle<()>,
}

impl Trace {
    pub fn read(
        path: PathBuf,
        requests_per_block: usize,
        blocks_per_queue: usize,
    ) -> io::Result<Trace> {
        let file = fs::File::open(&path)?;
        let stream: Box<dyn Read + Send> = if path.extension().is_some_and(|ext| ext == "xz") {
            Box::new(XzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Ok(Trace::from_reader(stream, requests_per_block, blocks_per_queue))
    }

    pub fn from_reader<R: Read + Send + 'static>(
        stream: R,
        requests_per_block: usize,
        blocks_per_queue: usize,
    ) -> Trace {
        let (sender, receiver) = crossbeam::channel::bounded(blocks_per_queue);
        let t = thread::spawn(move || {
            Trace::run_thread(BufReader::new(stream), requests_per_block.max(1), sender)
        });

        Trace {
            rec: receiver,
            _thread: t,
        }
    }

    fn run_thread<R: BufRead>(stream: R, requests_per_block: usize, queue: Sender<Block>) {
        let mut block = Vec::with_capacity(requests_per_block);

        for (idx, line) in stream.lines().enumerate() {
            let parsed = line
                .map_err(TraceError::from)
                .and_then(|line| match line.trim() {
                    "" => Ok(None),
                    line => Request::parse(line, idx + 1).map(Some),
                });

            match parsed {
                Ok(Some(req)) => block.push(req),
                Ok(None) => continue,
                Err(err) => {
                    if !block.is_empty() && queue.send(Ok(mem::take(&mut block))).is_err() {
                        return;
                    }
                    let _ = queue.send(Err(err));
                    return;
                }
            }

            if block.len() == requests_per_block {
                let full = mem::replace(&mut block, Vec::with_capacity(requests_per_block));
                // the reader hung up
                if queue.send(Ok(full)).is_err() {
                    return;
                }
            }
        }

        if !block.is_empty() {
            let _ = queue.send(Ok(block));
        }
    }
}
