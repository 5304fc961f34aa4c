use std::any::Any;
use std::fmt;

use time::OffsetDateTime;

/// Per-stream record threaded through every chunk conversion of one stream.
///
/// Owned by exactly one request pipeline and handed to converters by `&mut`.
/// `model` and `message_id` are fixed at construction, `message_started`
/// only ever goes from `false` to `true`. Converters keep their own
/// accumulation in the scratch slot, which nobody else inspects.
pub struct StreamConversionState {
    model: String,
    message_id: String,
    created: i64,
    message_started: bool,
    pub input_tokens: u64,
    pub output_tokens: u64,
    scratch: Option<Box<dyn Any + Send>>,
}

impl StreamConversionState {
    pub fn new(model: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            message_id: message_id.into(),
            created: OffsetDateTime::now_utc().unix_timestamp(),
            message_started: false,
            input_tokens: 0,
            output_tokens: 0,
            scratch: None,
        }
    }

    /// State with a freshly generated message id, e.g. `msg_5f0c...`.
    pub fn with_generated_id(model: impl Into<String>, prefix: &str) -> Self {
        let id = format!("{prefix}{}", uuid::Uuid::new_v4().simple());
        Self::new(model, id)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Unix timestamp captured when the stream started.
    pub fn created(&self) -> i64 {
        self.created
    }

    pub fn message_started(&self) -> bool {
        self.message_started
    }

    pub fn mark_message_started(&mut self) {
        self.message_started = true;
    }

    pub fn record_usage(&mut self, input_tokens: Option<u64>, output_tokens: Option<u64>) {
        if let Some(input) = input_tokens.filter(|value| *value > 0) {
            self.input_tokens = input;
        }
        if let Some(output) = output_tokens.filter(|value| *value > 0) {
            self.output_tokens = output;
        }
    }

    /// Converter-private accumulation, created on first access.
    ///
    /// A slot holding a different type is replaced, so one state must only
    /// ever be driven by a single converter.
    pub fn scratch_mut<T: Default + Send + 'static>(&mut self) -> &mut T {
        let slot = self
            .scratch
            .get_or_insert_with(|| Box::new(T::default()) as Box<dyn Any + Send>);
        if !slot.is::<T>() {
            *slot = Box::new(T::default());
        }
        match slot.downcast_mut::<T>() {
            Some(scratch) => scratch,
            None => unreachable!("scratch slot was just initialised with this type"),
        }
    }

    /// Runs `apply` with the scratch value detached, so it can read and
    /// update the rest of the state at the same time.
    pub fn with_scratch<T, R>(&mut self, apply: impl FnOnce(&mut T, &mut Self) -> R) -> R
    where
        T: Default + Send + 'static,
    {
        let mut scratch = std::mem::take(self.scratch_mut::<T>());
        let result = apply(&mut scratch, self);
        *self.scratch_mut::<T>() = scratch;
        result
    }
}

impl fmt::Debug for StreamConversionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConversionState")
            .field("model", &self.model)
            .field("message_id", &self.message_id)
            .field("message_started", &self.message_started)
            .field("input_tokens", &self.input_tokens)
            .field("output_tokens", &self.output_tokens)
            .finish_non_exhaustive()
    }
}
