use rayon::prelude::*;

/// Sort key for the k-mer occurrence arrays: the composite
/// `(hash << 34) | offset` word, so ordering is by hash first, then offset.
/// Element types implement this instead of passing extractor function
/// pointers around.
pub trait RadixKey: Copy + Send + Sync {
    fn sort_key(&self) -> u64;
}

const BUCKET_BITS: u32 = 16;
const NUM_BUCKETS: usize = 1 << BUCKET_BITS;

/// One serial scatter over the top 16 key bits, then the buckets are sorted
/// independently in parallel. Total order equals a stable sort by
/// `sort_key`, which is all callers rely on.
pub fn radix_sort<T: RadixKey>(items: &mut [T], num_threads: usize) {
    if items.len() < 2 {
        return;
    }
    let shift = 64 - BUCKET_BITS;
    let mut counts = vec![0usize; NUM_BUCKETS];
    for it in items.iter() {
        counts[(it.sort_key() >> shift) as usize] += 1;
    }
    let mut starts = vec![0usize; NUM_BUCKETS];
    let mut acc = 0usize;
    for b in 0..NUM_BUCKETS {
        starts[b] = acc;
        acc += counts[b];
    }

    let mut scratch = items.to_vec();
    let mut cursor = starts.clone();
    for it in items.iter() {
        let b = (it.sort_key() >> shift) as usize;
        scratch[cursor[b]] = *it;
        cursor[b] += 1;
    }
    items.copy_from_slice(&scratch);

    let mut buckets: Vec<&mut [T]> = Vec::new();
    let mut rest: &mut [T] = items;
    for b in 0..NUM_BUCKETS {
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(counts[b]);
        if !head.is_empty() {
            buckets.push(head);
        }
        rest = tail;
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads.max(1))
        .build()
        .expect("building sort thread pool");
    pool.install(|| {
        buckets
            .par_iter_mut()
            .for_each(|b| b.sort_unstable_by_key(|it| it.sort_key()));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    impl RadixKey for u64 {
        fn sort_key(&self) -> u64 {
            *self
        }
    }

    #[test]
    fn sorts_random_u64s() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut items: Vec<u64> = (0..10_000).map(|_| rng.gen()).collect();
        let mut expected = items.clone();
        expected.sort_unstable();
        radix_sort(&mut items, 4);
        assert_eq!(items, expected);
    }

    #[test]
    fn empty_and_single() {
        let mut empty: Vec<u64> = vec![];
        radix_sort(&mut empty, 2);
        let mut one = vec![42u64];
        radix_sort(&mut one, 2);
        assert_eq!(one, vec![42]);
    }
}
