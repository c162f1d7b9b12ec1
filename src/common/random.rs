use rand::distr::Alphanumeric;
use rand::Rng;

/// Random alphanumeric identifier, used for job ids and object keys.
pub fn rand_str(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
