/// Highest message id seen on a stream. Never moves backward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Watermark(Option<u64>);

impl Watermark {
    pub fn get(&self) -> Option<u64> {
        self.0
    }

    /// Raise the watermark to `message_id` if it is higher. Returns `true` on advance.
    pub fn observe(&mut self, message_id: u64) -> bool {
        match self.0 {
            Some(current) if current >= message_id => false,
            _ => {
                self.0 = Some(message_id);
                true
            }
        }
    }

    /// Whether `message_id` lies strictly above the watermark.
    pub fn is_above(&self, message_id: u64) -> bool {
        self.0.is_none_or(|current| message_id > current)
    }

    pub fn reset(&mut self) {
        self.0 = None;
    }
}
