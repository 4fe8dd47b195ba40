use rand::{distributions::Alphanumeric, Rng};

/// Length of a post slug; matches the `identifiers.value` column width.
pub const DEFAULT_SLUG_LEN: usize = 11;

/// Upper bound on generate-and-insert rounds for one refill. Collisions are
/// vanishingly rare at the default length, so hitting this means the length is
/// too short for the pool size.
pub const MAX_REFILL_ROUNDS: usize = 8;

/// Draws `count` random ASCII-alphanumeric candidates of `len` characters.
/// Candidates are not checked against each other or the pool.
pub fn generate(count: usize, len: usize) -> Vec<String> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| (&mut rng).sample_iter(&Alphanumeric).take(len).map(char::from).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_have_requested_shape() {
        let batch = generate(50, DEFAULT_SLUG_LEN);
        assert_eq!(batch.len(), 50);
        assert!(batch.iter().all(|s| s.len() == DEFAULT_SLUG_LEN));
        assert!(batch.iter().all(|s| s.chars().all(|c| c.is_ascii_alphanumeric())));
    }

    #[test]
    fn zero_count_is_empty() {
        assert!(generate(0, 4).is_empty());
    }
}
