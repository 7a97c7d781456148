/// Gate for destructive actions: a request parks its payload until the user
/// confirms or cancels. Either answer returns the gate to idle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation<T> {
    Idle,
    Pending(T),
}

impl<T> Default for Confirmation<T> {
    fn default() -> Self {
        Confirmation::Idle
    }
}

impl<T> Confirmation<T> {
    /// Parks `payload`, replacing any request still waiting.
    pub fn request(&mut self, payload: T) {
        *self = Confirmation::Pending(payload);
    }

    pub fn pending(&self) -> Option<&T> {
        match self {
            Confirmation::Pending(payload) => Some(payload),
            Confirmation::Idle => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Confirmation::Pending(_))
    }

    pub fn confirm(&mut self) -> Option<T> {
        match std::mem::take(self) {
            Confirmation::Pending(payload) => Some(payload),
            Confirmation::Idle => None,
        }
    }

    pub fn cancel(&mut self) -> Option<T> {
        self.confirm()
    }
}
