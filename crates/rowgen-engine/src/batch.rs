use rowgen_core::Record;

/// Buffers admitted records and hands them out in batches of `capacity`.
#[derive(Debug)]
pub struct BatchAccumulator {
    capacity: usize,
    buf: Vec<Record>,
}

impl BatchAccumulator {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Add a record; returns the full batch once capacity is reached.
    pub fn push(&mut self, record: Record) -> Option<Vec<Record>> {
        self.buf.push(record);
        if self.buf.len() >= self.capacity {
            Some(self.take())
        } else {
            None
        }
    }

    /// End of stream: whatever is buffered, if anything.
    pub fn finish(&mut self) -> Option<Vec<Record>> {
        (!self.buf.is_empty()).then(|| self.take())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn take(&mut self) -> Vec<Record> {
        std::mem::replace(&mut self.buf, Vec::with_capacity(self.capacity))
    }
}
