// crates/core/src/decoder.rs
//! Incremental decoding of one large payload into bounded batches.
//!
//! The payload is a JSON array, either already parsed (`Payload::Value`) or
//! still encoded (`Payload::Encoded`). Encoded payloads may carry the array
//! inside a JSON string, one level deep, which is how the remote service
//! ships result pages. Elements are streamed straight out of the parser, so
//! the full decode is never materialized at once.
//!
//! In `DecodeMode::Background` the parse runs on tokio's blocking pool and
//! batches flow back over a bounded channel. In `DecodeMode::Inline` the
//! whole payload is decoded on the caller's thread into a single final batch.

use std::fmt;
use std::marker::PhantomData;

use futures_util::stream::{self, Stream};
use serde::de::{self, DeserializeOwned, DeserializeSeed, SeqAccess, Visitor};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::DecodeError;

/// Default upper bound on elements per batch.
pub const DEFAULT_MAX_BATCH_ELEMENTS: usize = 1000;

/// Default number of batches buffered between worker and consumer.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 8;

/// Message used to abort the parser once the consumer has gone away.
const CONSUMER_GONE: &str = "batch consumer dropped";

/// Something to decode.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// JSON text: an array, or a string whose contents are an array.
    Encoded(String),
    /// An already-parsed value. Must be an array.
    Value(Value),
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Encoded(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Encoded(text.to_string())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => Self::Encoded(text),
            other => Self::Value(other),
        }
    }
}

/// A bounded chunk of decoded elements.
///
/// Every batch but the last is non-empty and has `finished == false`.
/// The last batch has `finished == true` and may be empty only when the
/// whole payload decoded to zero elements.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeBatch<T = Value> {
    /// Index of `elements[0]` within the full decode.
    pub offset: usize,
    pub elements: Vec<T>,
    pub finished: bool,
}

/// Where decoding runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// On tokio's blocking pool, streaming batches back.
    Background,
    /// On the caller's thread, collapsed into one batch.
    Inline,
}

impl DecodeMode {
    /// `Background` when constructed inside a tokio runtime, else `Inline`.
    pub fn detect() -> Self {
        if tokio::runtime::Handle::try_current().is_ok() {
            Self::Background
        } else {
            Self::Inline
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    pub max_batch_elements: usize,
    pub channel_capacity: usize,
    pub mode: DecodeMode,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_batch_elements: DEFAULT_MAX_BATCH_ELEMENTS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            mode: DecodeMode::detect(),
        }
    }
}

/// Splits payloads into `DecodeBatch`es. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StreamingDecoder {
    config: DecoderConfig,
}

impl StreamingDecoder {
    /// Decoder with the given batch bound and a detected `DecodeMode`.
    pub fn new(max_batch_elements: usize) -> Result<Self, DecodeError> {
        Self::with_config(DecoderConfig {
            max_batch_elements,
            ..DecoderConfig::default()
        })
    }

    pub fn with_config(config: DecoderConfig) -> Result<Self, DecodeError> {
        if config.max_batch_elements == 0 {
            return Err(DecodeError::InvalidArgument(
                "max batch elements must be a positive integer".to_string(),
            ));
        }
        if config.channel_capacity == 0 {
            return Err(DecodeError::InvalidArgument(
                "decode channel capacity must be a positive integer".to_string(),
            ));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn mode(&self) -> DecodeMode {
        self.config.mode
    }

    /// Start decoding `payload`. Batches are pulled from the returned stream.
    ///
    /// Falls back to inline decoding if the decoder was configured for the
    /// background but no tokio runtime is reachable from this thread.
    pub fn decode<T>(&self, payload: impl Into<Payload>) -> DecodeStream<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let payload = payload.into();
        let background = self.config.mode == DecodeMode::Background
            && tokio::runtime::Handle::try_current().is_ok();

        if !background {
            if self.config.mode == DecodeMode::Background {
                tracing::debug!("no tokio runtime available, decoding inline");
            }
            let (tx, rx) = mpsc::channel(1);
            let mut collected = None;
            let outcome = decode_payload(payload, usize::MAX, |batch: DecodeBatch<T>| {
                collected = Some(batch);
                true
            });
            let item = match outcome {
                Ok(()) => collected.map(Ok),
                Err(e) => Some(Err(e)),
            };
            if let Some(item) = item {
                // Capacity 1 and a single item: cannot be full.
                let _ = tx.try_send(item);
            }
            return DecodeStream {
                rx,
                worker: None,
                done: false,
            };
        }

        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let max = self.config.max_batch_elements;
        let worker = tokio::task::spawn_blocking(move || {
            let outcome = decode_payload(payload, max, |batch| tx.blocking_send(Ok(batch)).is_ok());
            if let Err(e) = outcome {
                let _ = tx.blocking_send(Err(e));
            }
        });

        DecodeStream {
            rx,
            worker: Some(worker),
            done: false,
        }
    }

    /// Decode on the current thread, pushing each batch to `on_batch`.
    ///
    /// Obeys the configured batch bound regardless of `DecodeMode`. Returns
    /// the total element count. Batches delivered before an error stay valid.
    pub fn decode_with<T, F>(
        &self,
        payload: impl Into<Payload>,
        mut on_batch: F,
    ) -> Result<usize, DecodeError>
    where
        T: DeserializeOwned,
        F: FnMut(DecodeBatch<T>),
    {
        let mut total = 0;
        decode_payload(payload.into(), self.config.max_batch_elements, |batch: DecodeBatch<T>| {
            total += batch.elements.len();
            on_batch(batch);
            true
        })?;
        Ok(total)
    }
}

/// Consumer side of one decode session.
///
/// Yields batches in generation order, then ends. A decode failure is the
/// last item.
pub struct DecodeStream<T = Value> {
    rx: mpsc::Receiver<Result<DecodeBatch<T>, DecodeError>>,
    worker: Option<JoinHandle<()>>,
    done: bool,
}

impl<T> DecodeStream<T>
where
    T: Send + 'static,
{
    /// Wait for the next batch. `None` after the finished batch or an error.
    pub async fn next_batch(&mut self) -> Option<Result<DecodeBatch<T>, DecodeError>> {
        if self.done {
            return None;
        }
        match self.rx.recv().await {
            Some(Ok(batch)) => {
                self.done = batch.finished;
                Some(Ok(batch))
            }
            Some(Err(e)) => {
                self.done = true;
                Some(Err(e))
            }
            None => {
                self.done = true;
                let reason = match self.worker.take() {
                    Some(worker) => match worker.await {
                        Err(e) => {
                            tracing::error!("decode worker failed: {e}");
                            e.to_string()
                        }
                        Ok(()) => "worker exited without a final batch".to_string(),
                    },
                    None => "decode produced no batches".to_string(),
                };
                Some(Err(DecodeError::WorkerLost(reason)))
            }
        }
    }

    /// Push every batch to `on_batch`. Returns the total element count.
    pub async fn for_each_batch<F>(mut self, mut on_batch: F) -> Result<usize, DecodeError>
    where
        F: FnMut(DecodeBatch<T>),
    {
        let mut total = 0;
        while let Some(item) = self.next_batch().await {
            let batch = item?;
            total += batch.elements.len();
            on_batch(batch);
        }
        Ok(total)
    }

    /// Concatenate every batch. Mostly useful for small payloads and tests.
    pub async fn collect_elements(self) -> Result<Vec<T>, DecodeError> {
        let mut all = Vec::new();
        self.for_each_batch(|batch| all.extend(batch.elements)).await?;
        Ok(all)
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<DecodeBatch<T>, DecodeError>> {
        stream::unfold(self, |mut decode| async move {
            decode.next_batch().await.map(|item| (item, decode))
        })
    }
}

/// Accumulates elements and hands full batches to `sink`.
///
/// A full batch is held back until the next element arrives so that the
/// last batch handed out is always the `finished` one.
struct BatchEmitter<T, F> {
    max: usize,
    buffer: Vec<T>,
    offset: usize,
    decoded: usize,
    consumer_gone: bool,
    sink: F,
}

impl<T, F> BatchEmitter<T, F>
where
    F: FnMut(DecodeBatch<T>) -> bool,
{
    fn new(max: usize, sink: F) -> Self {
        Self {
            max,
            buffer: Vec::with_capacity(max.min(1024)),
            offset: 0,
            decoded: 0,
            consumer_gone: false,
            sink,
        }
    }

    fn push(&mut self, element: T) -> bool {
        if self.buffer.len() == self.max {
            let fresh = Vec::with_capacity(self.max.min(1024));
            let elements = std::mem::replace(&mut self.buffer, fresh);
            let len = elements.len();
            let batch = DecodeBatch {
                offset: self.offset,
                elements,
                finished: false,
            };
            if !(self.sink)(batch) {
                self.consumer_gone = true;
                return false;
            }
            self.offset += len;
        }
        self.buffer.push(element);
        self.decoded += 1;
        true
    }

    fn finish(mut self) {
        let batch = DecodeBatch {
            offset: self.offset,
            elements: std::mem::take(&mut self.buffer),
            finished: true,
        };
        (self.sink)(batch);
    }
}

/// Decode `payload` through a `BatchEmitter`. A vanished consumer is not an error.
fn decode_payload<T, F>(payload: Payload, max: usize, sink: F) -> Result<(), DecodeError>
where
    T: DeserializeOwned,
    F: FnMut(DecodeBatch<T>) -> bool,
{
    let mut emitter = BatchEmitter::new(max, sink);

    match payload {
        Payload::Value(Value::Array(items)) => {
            for (offset, item) in items.into_iter().enumerate() {
                let element = serde_json::from_value::<T>(item)
                    .map_err(|e| DecodeError::malformed(offset, e.to_string()))?;
                if !emitter.push(element) {
                    return Ok(());
                }
            }
        }
        Payload::Value(other) => {
            return Err(DecodeError::malformed(
                0,
                format!("expected a JSON array, found {}", value_kind(&other)),
            ));
        }
        Payload::Encoded(text) => {
            let mut de = serde_json::Deserializer::from_str(&text);
            let seed = ElementSeq {
                emitter: &mut emitter,
                unwrap_string: true,
                _element: PhantomData,
            };
            let parsed = seed.deserialize(&mut de).and_then(|()| de.end());
            if let Err(e) = parsed {
                if emitter.consumer_gone {
                    return Ok(());
                }
                return Err(DecodeError::malformed(emitter.decoded, e.to_string()));
            }
        }
    }

    emitter.finish();
    Ok(())
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Serde seed that streams the elements of a top-level array into an emitter.
struct ElementSeq<'a, T, F> {
    emitter: &'a mut BatchEmitter<T, F>,
    /// Accept a string whose contents are the array (one level only).
    unwrap_string: bool,
    _element: PhantomData<fn() -> T>,
}

impl<'de, T, F> DeserializeSeed<'de> for ElementSeq<'_, T, F>
where
    T: DeserializeOwned,
    F: FnMut(DecodeBatch<T>) -> bool,
{
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> Result<(), D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_any(self)
    }
}

impl<'de, T, F> Visitor<'de> for ElementSeq<'_, T, F>
where
    T: DeserializeOwned,
    F: FnMut(DecodeBatch<T>) -> bool,
{
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unwrap_string {
            f.write_str("a JSON array or a string containing one")
        } else {
            f.write_str("a JSON array")
        }
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        while let Some(element) = seq.next_element::<T>()? {
            if !self.emitter.push(element) {
                return Err(de::Error::custom(CONSUMER_GONE));
            }
        }
        Ok(())
    }

    fn visit_str<E>(self, text: &str) -> Result<(), E>
    where
        E: de::Error,
    {
        if !self.unwrap_string {
            return Err(de::Error::invalid_type(de::Unexpected::Str(text), &self));
        }
        let mut inner = serde_json::Deserializer::from_str(text);
        let seed = ElementSeq {
            emitter: &mut *self.emitter,
            unwrap_string: false,
            _element: PhantomData,
        };
        seed.deserialize(&mut inner)
            .and_then(|()| inner.end())
            .map_err(|e| de::Error::custom(format!("in nested payload: {e}")))
    }
}
