/// Which finding is highlighted, shared by the overlay and the findings list.
///
/// The list drives it with hover enter/leave, the overlay with clicks. A click
/// always sets the id; only a hover-leave clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    active: Option<String>,
}

impl Selection {
    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active.as_deref() == Some(id)
    }

    pub fn set(&mut self, id: Option<String>) {
        self.active = id;
    }

    pub fn hover_enter(&mut self, id: &str) {
        self.active = Some(id.to_string());
    }

    pub fn hover_leave(&mut self) {
        self.active = None;
    }

    pub fn click(&mut self, id: &str) {
        self.active = Some(id.to_string());
    }

    pub fn clear(&mut self) {
        self.active = None;
    }
}
