pub mod encoded_key;
pub mod keys;
