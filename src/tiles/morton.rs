//! Z-order traversal of a rectangular grid.

/// Extracts every other bit of `code`, starting at bit `shift`.
fn deinterleave(code: u64, shift: u32) -> u32 {
    let mut coordinate = 0u32;
    for bit in 0..32 {
        coordinate |= (((code >> (2 * bit + shift)) & 1) as u32) << bit;
    }
    coordinate
}

pub fn decode(code: u64) -> (u32, u32) {
    (deinterleave(code, 0), deinterleave(code, 1))
}

/// Row-major ids of a `cols x rows` grid in Z-order. Codes that decode
/// outside the grid are skipped, so non power-of-two grids still visit
/// every cell exactly once.
pub fn morton_order(cols: u32, rows: u32) -> Vec<u32> {
    let total = cols as usize * rows as usize;
    let mut order = Vec::with_capacity(total);
    let mut code = 0u64;
    while order.len() < total {
        let (x, y) = decode(code);
        code += 1;
        if x < cols && y < rows {
            order.push(y * cols + x);
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_first_quad() {
        assert_eq!(decode(0), (0, 0));
        assert_eq!(decode(1), (1, 0));
        assert_eq!(decode(2), (0, 1));
        assert_eq!(decode(3), (1, 1));
        assert_eq!(decode(4), (2, 0));
    }

    #[test]
    fn visits_every_cell_once() {
        let mut order = morton_order(5, 3);
        assert_eq!(order.len(), 15);
        assert_eq!(&order[..4], &[0, 1, 5, 6]);
        order.sort_unstable();
        assert_eq!(order, (0..15).collect::<Vec<_>>());
    }
}
