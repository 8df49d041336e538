//! Batched mutations

/// Kind of operation carried by a [`KvPair`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpType {
    Set,
    Delete,
    /// Skipped when the batch is applied
    Noop,
}

/// One entry of a batch. Implemented by callers' own change types so they
/// can be applied without copying into [`Mutation`] first.
pub trait KvPair {
    fn op(&self) -> OpType;
    fn key(&self) -> &[u8];
    /// Ignored unless `op()` is [`OpType::Set`]
    fn value(&self) -> &[u8];
}

/// An owned [`KvPair`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mutation {
    pub op: OpType,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Mutation {
    pub fn set(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Mutation {
            op: OpType::Set,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        Mutation {
            op: OpType::Delete,
            key: key.into(),
            value: Vec::new(),
        }
    }

    pub fn noop() -> Self {
        Mutation {
            op: OpType::Noop,
            key: Vec::new(),
            value: Vec::new(),
        }
    }
}

impl KvPair for Mutation {
    fn op(&self) -> OpType {
        self.op
    }

    fn key(&self) -> &[u8] {
        &self.key
    }

    fn value(&self) -> &[u8] {
        &self.value
    }
}

impl<P: KvPair + ?Sized> KvPair for &P {
    fn op(&self) -> OpType {
        (**self).op()
    }

    fn key(&self) -> &[u8] {
        (**self).key()
    }

    fn value(&self) -> &[u8] {
        (**self).value()
    }
}
