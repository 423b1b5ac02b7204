use super::block::GameBlock;
use crate::config::DYNAMIC_MAP_THRESHOLD;
use crate::error::WorldError;
use crate::role::Role;
use crate::types::{Cell, MapId, PartitionId, RoleId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Self plus the eight surrounding blocks.
pub const NEIGHBOR_OFFSETS: [(i32, i32); 9] = [
    (0, 0),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
];

/// Map definition as loaded from the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapDescriptor {
    pub id: MapId,
    pub name: String,
    pub width: i32,
    pub height: i32,
    /// Cells nobody can stand on
    #[serde(default)]
    pub blocked: Vec<Cell>,
}

/// A loaded map: terrain plus a grid of blocks.
#[derive(Debug)]
pub struct GameMap {
    id: MapId,
    name: String,
    width: i32,
    height: i32,
    block_size: i32,
    blocks_wide: i32,
    blocks_high: i32,
    blocks: Vec<GameBlock>,
    walkable: Vec<bool>,
    partition: PartitionId,
    players: AtomicUsize,
}

/// Row-major index of an in-bounds cell. Large maps overflow `i32`.
fn cell_index(width: i32, cell: Cell) -> usize {
    cell.y as usize * width as usize + cell.x as usize
}

impl GameMap {
    /// Builds the map and its `ceil(w / B) × ceil(h / B)` block grid.
    pub fn new(descriptor: &MapDescriptor, block_size: i32, partition: PartitionId) -> Self {
        let width = descriptor.width.max(0);
        let height = descriptor.height.max(0);
        let block_size = block_size.max(1);
        let blocks_wide = (width + block_size - 1) / block_size;
        let blocks_high = (height + block_size - 1) / block_size;

        let mut walkable = vec![true; (width as usize) * (height as usize)];
        for cell in &descriptor.blocked {
            if cell.x >= 0 && cell.y >= 0 && cell.x < width && cell.y < height {
                walkable[cell_index(width, *cell)] = false;
            }
        }

        let blocks = (0..blocks_wide * blocks_high).map(|_| GameBlock::new()).collect();

        Self {
            id: descriptor.id,
            name: descriptor.name.clone(),
            width,
            height,
            block_size,
            blocks_wide,
            blocks_high,
            blocks,
            walkable,
            partition,
            players: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> MapId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    /// Partition that serializes work for this map.
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Block grid dimensions.
    pub fn block_grid(&self) -> (i32, i32) {
        (self.blocks_wide, self.blocks_high)
    }

    pub fn is_dynamic(&self) -> bool {
        self.id.0 > DYNAMIC_MAP_THRESHOLD
    }

    pub fn contains(&self, cell: Cell) -> bool {
        cell.x >= 0 && cell.y >= 0 && cell.x < self.width && cell.y < self.height
    }

    /// Block coordinates for a cell, or `None` outside the map.
    pub fn block_index(&self, cell: Cell) -> Option<(i32, i32)> {
        self.contains(cell)
            .then(|| (cell.x / self.block_size, cell.y / self.block_size))
    }

    pub fn block_at(&self, bx: i32, by: i32) -> Option<&GameBlock> {
        if bx < 0 || by < 0 || bx >= self.blocks_wide || by >= self.blocks_high {
            return None;
        }
        self.blocks.get(by as usize * self.blocks_wide as usize + bx as usize)
    }

    /// Block containing `cell`.
    pub fn block_for(&self, cell: Cell) -> Option<&GameBlock> {
        let (bx, by) = self.block_index(cell)?;
        self.block_at(bx, by)
    }

    /// Terrain passability of a single cell.
    pub fn can_stand(&self, cell: Cell) -> bool {
        self.contains(cell) && self.walkable[cell_index(self.width, cell)]
    }

    /// Puts a role into the block matching its current cell.
    pub fn add_role(&self, role: &Arc<Role>) -> Result<(), WorldError> {
        let cell = role.cell();
        let block = self.block_for(cell).ok_or(WorldError::OutOfBounds {
            map: self.id,
            cell,
        })?;
        if block.add(role) && role.is_player() {
            self.players.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }

    /// Takes a role out of whichever block holds it.
    pub fn remove_role(&self, role: &Role) -> bool {
        self.remove_role_at(role, role.cell())
    }

    /// Takes a role out of the block of `cell`, falling back to a full scan.
    /// Used when the role's stored cell already points somewhere else.
    pub fn remove_role_at(&self, role: &Role, cell: Cell) -> bool {
        let removed = match self.block_for(cell) {
            Some(block) if block.remove(role) => true,
            _ => {
                // Not where its cell says it is: a concurrent move is in flight.
                debug!(map = %self.id, role = %role.id(), "role not in expected block, scanning");
                self.blocks.iter().any(|block| block.remove(role))
            }
        };
        if removed && role.is_player() {
            let _ = self
                .players
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        }
        removed
    }

    /// Moves block membership from the block of `old` to the block of `new`.
    ///
    /// A no-op when both cells map to the same block. The role is added to
    /// the new block before it leaves the old one, so a concurrent proximity
    /// query may briefly see it twice but never misses it.
    pub fn enter_block(&self, role: &Arc<Role>, new: Cell, old: Option<Cell>) -> bool {
        let new_index = self.block_index(new);
        let old_index = old.and_then(|cell| self.block_index(cell));
        if new_index.is_some() && new_index == old_index {
            return false;
        }

        if let Some(block) = new_index.and_then(|(bx, by)| self.block_at(bx, by)) {
            block.add(role);
        }
        if let Some(block) = old_index.and_then(|(bx, by)| self.block_at(bx, by)) {
            block.remove(role);
        }
        true
    }

    /// Moves a role if the destination is legal for its footprint.
    pub fn try_move(&self, role: &Arc<Role>, to: Cell) -> bool {
        if !self.is_move_enable(to, role.footprint(), Some(role.id())) {
            return false;
        }
        self.relocate(role, to).is_ok()
    }

    /// Moves a role without legality checks, keeping block membership consistent.
    pub fn relocate(&self, role: &Arc<Role>, to: Cell) -> Result<(), WorldError> {
        let Some(new_block) = self.block_for(to) else {
            return Err(WorldError::OutOfBounds { map: self.id, cell: to });
        };
        let from = role.cell();
        if self.block_index(from) == self.block_index(to) {
            role.set_cell(to);
            return Ok(());
        }

        new_block.add(role);
        role.set_cell(to);
        if let Some(old_block) = self.block_for(from) {
            old_block.remove(role);
        }
        Ok(())
    }

    /// Every role in the 3×3 blocks centred on `cell`'s block.
    pub fn query_neighbors(&self, cell: Cell) -> Vec<Arc<Role>> {
        let Some((bx, by)) = self.block_index(cell) else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for (dx, dy) in NEIGHBOR_OFFSETS {
            if let Some(block) = self.block_at(bx + dx, by + dy) {
                for role in block.roles() {
                    if seen.insert(role.id()) {
                        result.push(role);
                    }
                }
            }
        }
        result
    }

    /// Whether a blocking role other than `excluding` stands exactly on `cell`.
    pub fn is_occupied(&self, cell: Cell, excluding: Option<RoleId>) -> bool {
        let Some(block) = self.block_for(cell) else {
            return false;
        };
        block.any(|role| {
            Some(role.id()) != excluding && role.blocks_movement() && role.cell() == cell
        })
    }

    /// Movement legality for an entity of edge length `footprint` anchored at `cell`.
    ///
    /// Every cell of the footprint square must be passable terrain and free of
    /// other blockers; cells may fall into neighbouring blocks.
    pub fn is_move_enable(&self, cell: Cell, footprint: u8, excluding: Option<RoleId>) -> bool {
        let size = i32::from(footprint.max(1));
        let low = -(size - 1) / 2;
        let high = size / 2;
        for dy in low..=high {
            for dx in low..=high {
                let spot = cell.offset(dx, dy);
                if !self.can_stand(spot) || self.is_occupied(spot, excluding) {
                    return false;
                }
            }
        }
        true
    }

    /// Whether a spawn may be placed on `cell`.
    pub fn is_standable(&self, cell: Cell) -> bool {
        self.can_stand(cell) && !self.is_occupied(cell, None)
    }

    pub fn player_count(&self) -> usize {
        self.players.load(Ordering::Acquire)
    }

    pub fn has_players(&self) -> bool {
        self.player_count() > 0
    }

    /// Every role on the map.
    pub fn roles(&self) -> Vec<Arc<Role>> {
        self.blocks.iter().flat_map(GameBlock::roles).collect()
    }

    pub fn role_count(&self) -> usize {
        self.blocks.iter().map(GameBlock::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::{CharacterProfile, MonsterOrigin, MonsterProfile};
    use crate::types::{AccountId, TemplateId};

    fn map(width: i32, height: i32) -> GameMap {
        GameMap::new(
            &MapDescriptor {
                id: MapId(3),
                name: "Bichon".into(),
                width,
                height,
                blocked: vec![Cell::new(5, 5)],
            },
            18,
            PartitionId(0),
        )
    }

    fn monster(id: u32, cell: Cell, footprint: u8) -> Arc<Role> {
        Arc::new(Role::monster(
            RoleId(id),
            MonsterProfile {
                template: TemplateId(1),
                name: "Oma".into(),
                origin: MonsterOrigin::Summoned,
                footprint,
            },
            MapId(3),
            cell,
        ))
    }

    fn player(id: u32, cell: Cell) -> Arc<Role> {
        Arc::new(Role::character(
            RoleId(id),
            CharacterProfile {
                account: AccountId(id),
                name: format!("p{id}"),
                level: 1,
                hp: 1,
                max_hp: 1,
                guild: None,
                shadow: false,
            },
            MapId(3),
            cell,
        ))
    }

    fn assert_in_own_block(map: &GameMap, role: &Arc<Role>) {
        let block = map.block_for(role.cell()).expect("cell on map");
        assert!(block.contains(role.id()));
        let holders = (0..map.block_grid().0)
            .flat_map(|bx| (0..map.block_grid().1).map(move |by| (bx, by)))
            .filter(|(bx, by)| map.block_at(*bx, *by).unwrap().contains(role.id()))
            .count();
        assert_eq!(holders, 1, "role must sit in exactly one block");
    }

    #[test]
    fn block_grid_rounds_up() {
        let m = map(100, 37);
        assert_eq!(m.block_grid(), (6, 3));
        assert_eq!(m.block_index(Cell::new(17, 17)), Some((0, 0)));
        assert_eq!(m.block_index(Cell::new(18, 36)), Some((1, 2)));
        assert_eq!(m.block_index(Cell::new(100, 0)), None);
        assert_eq!(m.block_index(Cell::new(-1, 0)), None);
    }

    #[test]
    fn cell_index_does_not_wrap_on_wide_maps() {
        assert_eq!(cell_index(100, Cell::new(3, 2)), 203);
        assert_eq!(cell_index(65_536, Cell::new(1, 40_000)), 2_621_440_001);
        assert_eq!(cell_index(i32::MAX, Cell::new(0, 2)), 2 * i32::MAX as usize);
    }

    #[test]
    fn relocation_keeps_block_consistency() {
        let m = map(100, 100);
        let role = monster(1, Cell::new(1, 1), 1);
        m.add_role(&role).unwrap();
        assert_in_own_block(&m, &role);

        for cell in [Cell::new(2, 2), Cell::new(20, 2), Cell::new(20, 40), Cell::new(99, 99)] {
            m.relocate(&role, cell).unwrap();
            assert_eq!(role.cell(), cell);
            assert_in_own_block(&m, &role);
        }

        assert!(m.relocate(&role, Cell::new(100, 1)).is_err());
        assert_in_own_block(&m, &role);
    }

    #[test]
    fn enter_block_is_noop_inside_one_block() {
        let m = map(40, 40);
        let role = monster(1, Cell::new(1, 1), 1);
        m.add_role(&role).unwrap();
        assert!(!m.enter_block(&role, Cell::new(3, 3), Some(Cell::new(1, 1))));
        assert!(m.enter_block(&role, Cell::new(20, 3), Some(Cell::new(1, 1))));
        assert!(m.block_at(1, 0).unwrap().contains(role.id()));
        assert!(!m.block_at(0, 0).unwrap().contains(role.id()));
    }

    #[test]
    fn neighbors_cover_exactly_the_surrounding_blocks() {
        // 5×4 blocks; one monster at the centre of every block.
        let m = map(90, 72);
        let mut id = 0;
        let mut placed = Vec::new();
        for by in 0..4 {
            for bx in 0..5 {
                id += 1;
                let role = monster(id, Cell::new(bx * 18 + 9, by * 18 + 9), 1);
                m.add_role(&role).unwrap();
                placed.push(((bx, by), role));
            }
        }

        for center in [Cell::new(0, 0), Cell::new(40, 30), Cell::new(89, 71), Cell::new(89, 0)] {
            let (cx, cy) = m.block_index(center).unwrap();
            let found: HashSet<_> = m.query_neighbors(center).iter().map(|r| r.id()).collect();
            let expected: HashSet<_> = placed
                .iter()
                .filter(|((bx, by), _)| (bx - cx).abs() <= 1 && (by - cy).abs() <= 1)
                .map(|(_, role)| role.id())
                .collect();
            assert_eq!(found, expected, "center {center}");
        }

        assert!(m.query_neighbors(Cell::new(-3, 0)).is_empty());
    }

    #[test]
    fn occupancy_ignores_dead_monsters_and_excluded_role() {
        let m = map(40, 40);
        let hen = monster(1, Cell::new(4, 4), 1);
        m.add_role(&hen).unwrap();

        assert!(m.is_occupied(Cell::new(4, 4), None));
        assert!(!m.is_occupied(Cell::new(4, 4), Some(hen.id())));
        assert!(!m.is_occupied(Cell::new(4, 5), None));

        hen.kill();
        assert!(!m.is_occupied(Cell::new(4, 4), None));

        let p = player(2, Cell::new(6, 6));
        m.add_role(&p).unwrap();
        p.kill();
        assert!(m.is_occupied(Cell::new(6, 6), None));
        assert_eq!(m.player_count(), 1);
    }

    #[test]
    fn large_footprint_checks_adjacent_cells() {
        let m = map(40, 40);
        let blocker = monster(1, Cell::new(18, 10), 1);
        m.add_role(&blocker).unwrap();

        // Footprint 3 anchored at (17, 10) covers (16..=18, 9..=11), crossing into block 1.
        assert!(!m.is_move_enable(Cell::new(17, 10), 3, None));
        assert!(m.is_move_enable(Cell::new(17, 10), 1, None));
        // Terrain: (5, 5) is blocked.
        assert!(!m.is_move_enable(Cell::new(6, 6), 3, None));
        assert!(m.is_move_enable(Cell::new(8, 8), 3, None));
        // Edge of the map.
        assert!(!m.is_move_enable(Cell::new(0, 0), 3, None));
    }

    #[test]
    fn try_move_respects_occupancy() {
        let m = map(40, 40);
        let a = monster(1, Cell::new(1, 1), 1);
        let b = monster(2, Cell::new(2, 2), 1);
        m.add_role(&a).unwrap();
        m.add_role(&b).unwrap();

        assert!(!m.try_move(&a, Cell::new(2, 2)));
        assert!(m.try_move(&a, Cell::new(1, 2)));
        assert!(!m.try_move(&a, Cell::new(5, 5)));
        assert_eq!(a.cell(), Cell::new(1, 2));
    }

    #[test]
    fn remove_role_updates_player_count() {
        let m = map(40, 40);
        let p = player(9, Cell::new(30, 30));
        m.add_role(&p).unwrap();
        assert!(m.has_players());
        assert!(m.remove_role(&p));
        assert!(!m.has_players());
        assert!(!m.remove_role(&p));
        assert_eq!(m.role_count(), 0);
    }
}
