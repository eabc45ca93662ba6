mod cursor;
mod slice;

pub use cursor::Cursor;
pub use slice::Slice;
