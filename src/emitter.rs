//! Message Emitter (spec.md §4.2): a multi-subscriber event source wrapping
//! the inbound Framed Codec so the Dispatcher and any number of passive
//! observers (e.g. a debug logger) can watch the same inbound stream without
//! each running their own framing read loop.

use futures::StreamExt;
use log::{debug, warn};
use tokio::io::AsyncRead;
use tokio::sync::broadcast;

use crate::codec::FramedReader;
use crate::message::{self, ErrorObject, Message};

/// One of the three logical channels spec.md §4.2 describes, folded into a
/// single enum so subscribers get them off one broadcast channel.
#[derive(Debug, Clone)]
pub enum Event {
    Message(Message),
    Error(ErrorObject),
    Close,
}

/// Default broadcast channel capacity. Generous because a slow subscriber
/// (the Dispatcher is the only mandatory one) should not have to keep up with
/// an optional logger; a lagging subscriber just skips ahead and we log it,
/// per spec.md §4.2 ("Maximum listeners is unbounded").
const CHANNEL_CAPACITY: usize = 1024;

/// Multi-subscriber emitter over a framed inbound stream.
pub struct MessageEmitter {
    sender: broadcast::Sender<Event>,
}

impl MessageEmitter {
    /// Spawns the read loop driving `reader` and returns an emitter handle.
    /// The loop runs until the stream ends or the emitter is dropped.
    pub fn spawn<T>(mut reader: FramedReader<T>) -> Self
    where
        T: AsyncRead + Unpin + Send + 'static,
        FramedReader<T>: Unpin + Send + 'static,
    {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let task_sender = sender.clone();

        tokio::spawn(async move {
            loop {
                match reader.next().await {
                    Some(Ok(value)) => match message::try_parse(&value) {
                        Ok(msg) => {
                            let _ = task_sender.send(Event::Message(msg));
                        }
                        Err(err) => {
                            warn!("protocol error parsing inbound message: {:?}", err);
                            let _ = task_sender.send(Event::Error(err));
                        }
                    },
                    Some(Err(err)) => {
                        // Malformed frame: not fatal to the connection, per
                        // spec.md §4.1.
                        warn!("malformed frame, continuing: {}", err);
                        let _ = task_sender.send(Event::Error(ErrorObject::new(
                            crate::message::error_code::PARSE_ERROR,
                            err.to_string(),
                        )));
                    }
                    None => {
                        debug!("inbound stream closed");
                        let _ = task_sender.send(Event::Close);
                        break;
                    }
                }
            }
        });

        MessageEmitter { sender }
    }

    /// Subscribes to this emitter's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}
