pub mod mytime;
pub mod zone;

#[cfg(test)]
pub mod test_utils;
