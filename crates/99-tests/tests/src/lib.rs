//! End-to-end suite for the log shunt.

#[cfg(test)]
mod file_e2e;

#[cfg(test)]
mod native_e2e;
