//! Time-delayed gameplay effects.
//!
//! An [`EventChain`] holds the effects produced by one action, each with its
//! own trigger delay. The [`EventManager`] advances every live chain once per
//! tick and hands the effects that fired back to the simulation, which applies
//! them to the world in the order they fired.

use crate::world::PROJECTILE_SPEED;
use shared::{ActionData, ProjectileData, SoundData, SpellEffect, SpellMatrix, Vector2};

/// What happens when an event fires.
#[derive(Debug, Clone, PartialEq)]
pub enum EventEffect {
    SpawnProjectile(ProjectileData),
    PlaySound(SoundData),
}

/// A single scheduled effect.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    elapsed: f32,
    threshold: f32,
    effect: EventEffect,
}

impl Event {
    /// Creates an event that fires once `threshold` seconds have elapsed.
    pub fn new(threshold: f32, effect: EventEffect) -> Self {
        Self {
            elapsed: 0.0,
            threshold,
            effect,
        }
    }

    /// Adds `dt` seconds of game time.
    pub fn add_time(&mut self, dt: f32) {
        self.elapsed += dt;
    }

    /// Checks whether enough time has elapsed to fire.
    pub fn should_execute(&self) -> bool {
        self.elapsed >= self.threshold
    }

    /// Seconds accumulated so far.
    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    /// Seconds after which the event fires.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// What the event does when it fires.
    pub fn effect(&self) -> &EventEffect {
        &self.effect
    }
}

/// An ordered batch of events sharing a start and target point.
///
/// A chain is finished once it holds no pending events; a chain built with no
/// events is finished from the start.
#[derive(Debug, Clone, Default)]
pub struct EventChain {
    events: Vec<Event>,
    distance: f32,
}

impl EventChain {
    /// Creates a finished chain with no events.
    pub fn new() -> Self {
        Self::default()
    }

    /// A chain whose effects travel from `start` to `target`.
    pub fn between(start: Vector2, target: Vector2) -> Self {
        Self {
            events: Vec::new(),
            distance: start.distance(&target),
        }
    }

    /// Resolves the spell matrix used by `action` into a chain.
    ///
    /// Projectiles leave after their node delay; sounds play at the target once
    /// a projectile fired at the same moment would have arrived. Events whose
    /// threshold is not finite could never fire and are left out.
    pub fn from_action(matrix: &SpellMatrix, action: &ActionData) -> Self {
        let mut chain = EventChain::between(action.start, action.target);
        let travel_time = chain.distance / PROJECTILE_SPEED;

        let events = matrix
            .filled()
            .map(|(_, node)| match &node.effect {
                SpellEffect::Projectile => Event::new(
                    node.delay,
                    EventEffect::SpawnProjectile(ProjectileData {
                        owner: action.player_id,
                        start: action.start,
                        target: action.target,
                    }),
                ),
                SpellEffect::Sound(name) => Event::new(
                    node.delay + travel_time,
                    EventEffect::PlaySound(SoundData {
                        name: name.clone(),
                        position: action.target,
                    }),
                ),
            })
            .filter(|event| event.threshold.is_finite())
            .collect();

        chain.add_events(events);
        chain
    }

    /// Appends a batch of events. An empty batch changes nothing.
    pub fn add_events(&mut self, events: Vec<Event>) {
        self.events.extend(events);
    }

    /// True once no events are pending.
    pub fn is_finished(&self) -> bool {
        self.events.is_empty()
    }

    /// Distance between start and target.
    pub fn distance(&self) -> f32 {
        self.distance
    }

    /// Events that have not fired, in insertion order.
    pub fn pending(&self) -> &[Event] {
        &self.events
    }

    /// Adds `dt` to every pending event and moves the effects of events that
    /// reached their threshold into `fired`. Remaining events keep their order.
    pub fn advance(&mut self, dt: f32, fired: &mut Vec<EventEffect>) -> usize {
        if self.is_finished() {
            return 0;
        }

        let before = fired.len();
        let pending = std::mem::take(&mut self.events);
        for mut event in pending {
            event.add_time(dt);
            if event.should_execute() {
                fired.push(event.effect);
            } else {
                self.events.push(event);
            }
        }
        fired.len() - before
    }
}

/// Owner of every live event chain.
#[derive(Debug, Default)]
pub struct EventManager {
    chains: Vec<EventChain>,
}

impl EventManager {
    /// Creates a manager with no chains.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `chain`. It is first advanced on the next update.
    pub fn add_chain(&mut self, chain: EventChain) {
        self.chains.push(chain);
    }

    /// Advances live chains in insertion order and drops every chain that is
    /// finished after its advance. Returns the fired effects in firing order.
    pub fn update(&mut self, dt: f32) -> Vec<EventEffect> {
        let mut fired = Vec::new();
        self.chains.retain_mut(|chain| {
            chain.advance(dt, &mut fired);
            !chain.is_finished()
        });
        fired
    }

    /// Number of live chains.
    pub fn len(&self) -> usize {
        self.chains.len()
    }

    /// Checks whether no chains are live.
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::SpellNode;

    fn sound(name: &str) -> EventEffect {
        EventEffect::PlaySound(SoundData {
            name: name.to_string(),
            position: Vector2::ZERO,
        })
    }

    fn chain_with(thresholds: &[f32]) -> EventChain {
        let mut chain = EventChain::new();
        chain.add_events(
            thresholds
                .iter()
                .map(|&t| Event::new(t, sound(&t.to_string())))
                .collect(),
        );
        chain
    }

    fn thresholds(chain: &EventChain) -> Vec<f32> {
        chain.pending().iter().map(|e| e.threshold()).collect()
    }

    #[test]
    fn test_empty_chain_is_finished() {
        let mut chain = EventChain::new();
        assert!(chain.is_finished());

        let mut fired = Vec::new();
        assert_eq!(chain.advance(1.0, &mut fired), 0);
        assert!(fired.is_empty());
        assert!(chain.is_finished());
    }

    #[test]
    fn test_add_empty_batch_is_noop() {
        let mut chain = chain_with(&[1.0]);
        chain.add_events(Vec::new());
        assert_eq!(chain.pending().len(), 1);
    }

    #[test]
    fn test_advance_fires_only_due_events() {
        let mut chain = chain_with(&[0.5, 1.2]);
        let mut fired = Vec::new();

        assert_eq!(chain.advance(0.6, &mut fired), 1);
        assert_eq!(fired, vec![sound("0.5")]);
        assert_eq!(thresholds(&chain), vec![1.2]);
        assert!(!chain.is_finished());
        assert_approx_eq!(chain.pending()[0].elapsed(), 0.6, 0.0001);

        fired.clear();
        assert_eq!(chain.advance(0.7, &mut fired), 1);
        assert_eq!(fired, vec![sound("1.2")]);
        assert!(chain.is_finished());
    }

    #[test]
    fn test_advance_preserves_order_of_remaining_events() {
        let mut chain = chain_with(&[1.0, 0.2, 2.0, 0.3, 3.0]);
        let mut fired = Vec::new();

        chain.advance(0.5, &mut fired);

        assert_eq!(fired, vec![sound("0.2"), sound("0.3")]);
        assert_eq!(thresholds(&chain), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_between_computes_distance() {
        let chain = EventChain::between(Vector2::new(1.0, 1.0), Vector2::new(4.0, 5.0));
        assert_approx_eq!(chain.distance(), 5.0, 0.0001);
        assert!(chain.is_finished());
    }

    #[test]
    fn test_from_action_schedules_matrix_nodes() {
        let mut matrix = SpellMatrix::default();
        matrix.set(
            0,
            Some(SpellNode {
                effect: SpellEffect::Projectile,
                delay: 0.1,
            }),
        );
        matrix.set(
            2,
            Some(SpellNode {
                effect: SpellEffect::Sound("impact".to_string()),
                delay: 0.1,
            }),
        );

        let action = ActionData {
            player_id: 3,
            slot: 0,
            start: Vector2::ZERO,
            target: Vector2::new(PROJECTILE_SPEED * 2.0, 0.0),
        };
        let chain = EventChain::from_action(&matrix, &action);

        assert_eq!(chain.pending().len(), 2);
        assert_approx_eq!(chain.pending()[0].threshold(), 0.1, 0.0001);
        assert_approx_eq!(chain.pending()[1].threshold(), 2.1, 0.0001);
        match chain.pending()[0].effect() {
            EventEffect::SpawnProjectile(data) => assert_eq!(data.owner, 3),
            other => panic!("Unexpected effect: {:?}", other),
        }
    }

    #[test]
    fn test_from_action_with_empty_matrix_is_finished() {
        let action = ActionData {
            player_id: 0,
            slot: 1,
            start: Vector2::ZERO,
            target: Vector2::new(1.0, 1.0),
        };
        assert!(EventChain::from_action(&SpellMatrix::default(), &action).is_finished());
    }

    #[test]
    fn test_chain_aimed_at_non_finite_point_still_finishes() {
        let mut manager = EventManager::new();
        for target in [Vector2::new(f32::NAN, 0.0), Vector2::new(f32::INFINITY, 0.0)] {
            let action = ActionData {
                player_id: 0,
                slot: 0,
                start: Vector2::ZERO,
                target,
            };
            manager.add_chain(EventChain::from_action(&crate::registry::starter_spell(), &action));
        }

        for _ in 0..10 {
            manager.update(1.0);
        }
        assert!(manager.is_empty());
    }

    #[test]
    fn test_manager_removes_chain_in_the_update_it_finishes() {
        let mut manager = EventManager::new();
        manager.add_chain(chain_with(&[0.5]));
        manager.add_chain(chain_with(&[0.5, 2.0]));
        assert_eq!(manager.len(), 2);

        let fired = manager.update(0.6);
        assert_eq!(fired, vec![sound("0.5"), sound("0.5")]);
        assert_eq!(manager.len(), 1);

        let fired = manager.update(2.0);
        assert_eq!(fired, vec![sound("2")]);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_manager_drops_empty_chain_without_skipping_neighbours() {
        let mut manager = EventManager::new();
        manager.add_chain(chain_with(&[0.1]));
        manager.add_chain(EventChain::new());
        manager.add_chain(chain_with(&[0.1]));
        manager.add_chain(chain_with(&[5.0]));

        let fired = manager.update(0.2);
        assert_eq!(fired.len(), 2);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_manager_update_order_is_insertion_order() {
        let mut manager = EventManager::new();
        manager.add_chain(chain_with(&[0.3]));
        manager.add_chain(chain_with(&[0.1]));
        manager.add_chain(chain_with(&[0.2]));

        let fired = manager.update(1.0);
        assert_eq!(fired, vec![sound("0.3"), sound("0.1"), sound("0.2")]);
    }
}
