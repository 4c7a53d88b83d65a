pub mod row;
pub mod cursor;
