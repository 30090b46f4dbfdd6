//! Max-pooling layer

use qlenet_fixed_point::Tensor3;

/// Non-overlapping 2×2 max pooling with stride 2.
///
/// Each output is the largest of its four inputs. Even `H`/`W` and the
/// halved output shape are checked at compile time. Generic over the element
/// so the float reference path shares it; no rounding is involved.
pub fn max_pool2x2<T, const C: usize, const H: usize, const W: usize, const OH: usize, const OW: usize>(
    input: &Tensor3<T, C, H, W>,
) -> Tensor3<T, C, OH, OW>
where
    T: Copy + PartialOrd,
{
    const {
        assert!(H % 2 == 0 && W % 2 == 0, "pooling input must have even height and width");
        assert!(OH == H / 2 && OW == W / 2, "pooling output must be half the input");
    };

    Tensor3::from_fn(|[c, y, x]| {
        let plane = input.channel(c);
        let top = (2 * y) * W + 2 * x;
        let bottom = top + W;
        [plane[top + 1], plane[bottom], plane[bottom + 1]]
            .into_iter()
            .fold(plane[top], |best, v| if v > best { v } else { best })
    })
}
