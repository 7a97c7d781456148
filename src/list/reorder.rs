/// Moves the element at `from` to position `to`, shifting everything in
/// between. Callers validate both indices against `list.len()`.
pub fn reorder<T>(mut list: Vec<T>, from: usize, to: usize) -> Vec<T> {
    if from == to {
        return list;
    }
    let item = list.remove(from);
    list.insert(to, item);
    list
}
