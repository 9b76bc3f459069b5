use mb_perf_session::OperationId;

/// An operation that has been started but not ended yet.
#[derive(Clone, Debug, PartialEq)]
pub struct OpenOperation {
    pub id: OperationId,
    pub name: String,
    pub start_time: f64,

    /// Name of the operation that was on top of the stack when this one started.
    pub parent: Option<String>,
}

/// The operations currently in flight, most recent last.
///
/// Operations usually end in reverse order of starting, but they don't have
/// to: ending removes the most recent operation with a matching name, wherever
/// it is in the stack.
#[derive(Debug, Default)]
pub struct TimingStack {
    open: Vec<OpenOperation>,
    next_id: u64,
}

impl TimingStack {
    pub fn push(&mut self, name: &str, start_time: f64) -> &OpenOperation {
        let id = OperationId(self.next_id);
        self.next_id += 1;

        let parent = self.top().map(ToOwned::to_owned);
        self.open.push(OpenOperation {
            id,
            name: name.to_owned(),
            start_time,
            parent,
        });
        &self.open[self.open.len() - 1]
    }

    /// Removes the most recently started operation called `name`.
    pub fn remove(&mut self, name: &str) -> Option<OpenOperation> {
        let index = self.open.iter().rposition(|op| op.name == name)?;
        Some(self.open.remove(index))
    }

    /// Name of the most recently started operation still open.
    pub fn top(&self) -> Option<&str> {
        self.open.last().map(|op| op.name.as_str())
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &OpenOperation> {
        self.open.iter()
    }
}
