//! Longest increasing subsequence.

/// Indices (ascending) of one longest strictly increasing subsequence of
/// `values`.
///
/// Patience sorting with back-pointers, O(n log n). Among equally long
/// subsequences the result is always the same for the same input.
pub fn longest_increasing_subsequence(values: &[usize]) -> Vec<usize> {
    // tails[k] = index of the smallest tail of an increasing run of length k+1
    let mut tails: Vec<usize> = Vec::new();
    let mut back: Vec<Option<usize>> = vec![None; values.len()];

    for (i, &value) in values.iter().enumerate() {
        let pos = tails.partition_point(|&t| values[t] < value);
        if pos > 0 {
            back[i] = Some(tails[pos - 1]);
        }
        if pos == tails.len() {
            tails.push(i);
        } else {
            tails[pos] = i;
        }
    }

    let mut out = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        out.push(i);
        cursor = back[i];
    }
    out.reverse();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn picked(values: &[usize]) -> Vec<usize> {
        longest_increasing_subsequence(values)
            .into_iter()
            .map(|i| values[i])
            .collect()
    }

    #[test]
    fn test_sorted_input_is_kept_whole() {
        assert_eq!(longest_increasing_subsequence(&[0, 1, 2, 3]), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_empty() {
        assert!(longest_increasing_subsequence(&[]).is_empty());
    }

    #[test]
    fn test_single_displaced_element() {
        // Moving the last element to the front displaces only that element.
        assert_eq!(picked(&[3, 0, 1, 2]), vec![0, 1, 2]);
        assert_eq!(picked(&[1, 2, 3, 0]), vec![1, 2, 3]);
    }

    #[test]
    fn test_reversed_keeps_one() {
        assert_eq!(longest_increasing_subsequence(&[4, 3, 2, 1]).len(), 1);
    }

    #[test]
    fn test_mixed() {
        let values = [2, 5, 3, 7, 11, 8, 10, 13, 6];
        let run = picked(&values);
        assert_eq!(run.len(), 6);
        assert!(run.windows(2).all(|w| w[0] < w[1]));
    }
}
