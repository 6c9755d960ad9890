/// The operand stack. Sized from the compiler's exact depth tracking, so
/// pushes never reallocate for well-formed code.
pub struct Stack<T> {
    items: Vec<T>,
}

impl<T> Stack<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn push(&mut self, value: T) {
        self.items.push(value);
    }

    /// Pops the top value. The compiler tracks stack depth for every
    /// instruction it emits, so an underflow is a compiler bug.
    #[inline]
    pub fn pop(&mut self) -> T {
        self.items
            .pop()
            .expect("operand stack underflow: compiled code is balanced")
    }

    /// Pops the top `n` values, returned in push order.
    pub fn pop_n(&mut self, n: usize) -> Vec<T> {
        debug_assert!(self.items.len() >= n, "Stack underflow");
        let start = self.items.len().saturating_sub(n);
        self.items.split_off(start)
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.last()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn truncate(&mut self, len: usize) {
        self.items.truncate(len);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
