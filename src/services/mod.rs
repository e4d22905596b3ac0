pub mod lifecycle;
pub mod payment;

#[cfg(test)]
pub(crate) mod test_support;
