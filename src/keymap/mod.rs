//! Console keymap: layout settings, the external table pipeline and the
//! resulting scancode <-> character table

pub mod layout;
pub mod resolver;
pub mod table;

pub use resolver::KeymapResolver;
pub use table::KeymapTable;
