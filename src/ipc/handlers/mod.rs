pub mod classes;
pub mod core;
pub mod exams;
pub mod marks;
pub mod results;
pub mod students;
pub mod subjects;
