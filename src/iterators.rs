pub mod line_iterator;
