pub mod entry;

pub use entry::{EntryId, EntryView, ObservedEntry, OwnedEntry, Values, ID_FIELD};
