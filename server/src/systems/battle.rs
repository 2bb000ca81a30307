//! Tank battles
//!
//! Damage lowers a tank's health, which every client that sees the tank
//! learns through [`SetHealthEvent`]. A tank at zero health is destroyed;
//! once at most one tank of its battle is left alive the battle is over.

use super::System;
use crate::dispatcher::{DispatchContext, DispatcherBuilder};
use crate::error::{HandlerError, ModelError, ProtocolError};
use crate::event::Event;
use crate::node::{AllowUnloaded, ChannelUser, GroupComponent, JoinBy};
use crate::object::{Component, GameObject, ObjectId, ObjectIds};
use crate::protocol::ProtocolBuilder;
use crate::space::Space;
use crate::systems::lobby::UserNode;
use crate::template::Template;
use crate::{client_event, model, node, server_event, template};
use log::info;
use shared::wire_struct;
use std::sync::Arc;

wire_struct! {
    #[derive(Debug, Clone, PartialEq)]
    pub struct Health {
        pub current: f32,
        pub max: f32,
    }
}
model!(Health = 1301);

wire_struct! {
    #[derive(Debug, Clone, PartialEq)]
    pub struct TankOwner {
        pub user_id: i64,
    }
}
model!(TankOwner = 1302);

/// Server side only: the battle a tank fights in
#[derive(Debug, Clone, PartialEq)]
pub struct BattleGroup {
    pub battle_id: i64,
}

impl Component for BattleGroup {}

impl GroupComponent for BattleGroup {
    fn group_key(&self) -> i64 {
        self.battle_id
    }
}

template! {
    pub struct TankTemplate(1300) {
        pub health: Arc<Health>,
        pub group: Arc<BattleGroup>,
        pub owner: Option<Arc<TankOwner>>,
    }
}

node! {
    pub struct TankNode match TankTemplate {
        pub health: Arc<Health>,
        pub group: Arc<BattleGroup>,
        pub owner: Option<Arc<TankOwner>>,
    }
}

impl TankNode {
    pub fn is_alive(&self) -> bool {
        self.health.current > 0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DamageEvent {
    pub amount: f32,
}

impl Event for DamageEvent {}

#[derive(Debug, Clone, PartialEq)]
pub struct TankDestroyedEvent;

impl Event for TankDestroyedEvent {}

wire_struct! {
    /// Client asks to destroy its own tank
    #[derive(Debug, Clone, PartialEq)]
    pub struct SelfDestructEvent {}
}
server_event!(SelfDestructEvent = 1312);

wire_struct! {
    #[derive(Debug, Clone, PartialEq)]
    pub struct SetHealthEvent {
        pub health: f32,
    }
}
client_event!(SetHealthEvent = 1310);

wire_struct! {
    #[derive(Debug, Clone, PartialEq)]
    pub struct BattleFinishedEvent {
        pub battle_id: i64,
        pub winner: Option<i64>,
    }
}
client_event!(BattleFinishedEvent = 1311);

/// Adds a tank to a battle in `space`
pub fn spawn_tank(
    space: &Space,
    ids: &ObjectIds,
    battle_id: i64,
    max_health: f32,
    owner: Option<ObjectId>,
) -> Result<Arc<GameObject>, ModelError> {
    let tank = TankTemplate {
        health: Arc::new(Health {
            current: max_health,
            max: max_health,
        }),
        group: Arc::new(BattleGroup { battle_id }),
        owner: owner.map(|user_id| Arc::new(TankOwner { user_id })),
    }
    .instantiate(ids.next())?;
    space.add(Arc::clone(&tank))?;
    Ok(tank)
}

async fn damage(
    ctx: DispatchContext,
    event: Arc<DamageEvent>,
    tank: TankNode,
) -> Result<(), HandlerError> {
    if !event.amount.is_finite() || event.amount < 0.0 {
        return Err(HandlerError::validation(format!(
            "invalid damage amount {}",
            event.amount
        )));
    }
    if !tank.is_alive() {
        return Ok(());
    }

    let health = tank.object.set(Health {
        current: (tank.health.current - event.amount).max(0.0),
        max: tank.health.max,
    });
    ctx.send(
        &SetHealthEvent {
            health: health.current,
        },
        &tank.object,
        ctx.remote(&tank.object),
    );

    if health.current <= 0.0 {
        ctx.schedule(TankDestroyedEvent, Arc::clone(&tank.object))
            .await?;
    }
    Ok(())
}

async fn destroyed(
    ctx: DispatchContext,
    _event: Arc<TankDestroyedEvent>,
    (tank, battle): (TankNode, AllowUnloaded<JoinBy<BattleGroup, TankNode>>),
) -> Result<(), HandlerError> {
    let alive: Vec<&TankNode> = battle.0.iter().filter(|other| other.is_alive()).collect();
    if alive.len() > 1 {
        return Ok(());
    }

    let finished = BattleFinishedEvent {
        battle_id: tank.group.battle_id,
        winner: alive.first().map(|winner| winner.object.id()),
    };
    info!(
        "Battle {} finished, winner {:?}",
        finished.battle_id, finished.winner
    );
    ctx.send(&finished, &tank.object, ctx.remote(&tank.object));
    Ok(())
}

async fn self_destruct(
    ctx: DispatchContext,
    _event: Arc<SelfDestructEvent>,
    (tank, user): (TankNode, ChannelUser<UserNode>),
) -> Result<(), HandlerError> {
    let user_id = user.0.object.id();
    if tank.owner.as_ref().map(|owner| owner.user_id) != Some(user_id) {
        return Err(HandlerError::validation(format!(
            "user {} does not own tank {}",
            user_id,
            tank.object.id()
        )));
    }
    ctx.schedule(
        DamageEvent {
            amount: tank.health.current,
        },
        Arc::clone(&tank.object),
    )
    .await?;
    Ok(())
}

pub struct BattleSystem;

impl System for BattleSystem {
    fn name(&self) -> &'static str {
        "battle"
    }

    fn declare(&self, protocol: &mut ProtocolBuilder) -> Result<(), ProtocolError> {
        protocol
            .model::<Health>()?
            .model::<TankOwner>()?
            .template::<TankTemplate>()?
            .server_event::<SelfDestructEvent>()?
            .client_event::<SetHealthEvent>()?
            .client_event::<BattleFinishedEvent>()?;
        Ok(())
    }

    fn handlers(&self, dispatcher: &mut DispatcherBuilder) {
        dispatcher
            .on("battle.damage", damage)
            .on("battle.destroyed", destroyed)
            .on("battle.self_destruct", self_destruct);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::engine::Engine;
    use crate::node::Node;
    use assert_approx_eq::assert_approx_eq;
    use tokio_test::assert_ok;

    fn engine() -> Arc<Engine> {
        let mut builder = Engine::builder(ServerConfig::default());
        builder
            .system(BattleSystem)
            .space(Space::new(9, Arc::new(GameObject::new(0, 0, "Battlefield"))));
        builder.build().unwrap()
    }

    #[tokio::test]
    async fn test_damage_lowers_health() {
        let engine = engine();
        let space = engine.spaces().get(9).unwrap();
        let tank = spawn_tank(&space, engine.ids(), 1, 100.0, None).unwrap();
        let ctx = engine.context(space, None);

        assert_ok!(ctx.schedule(DamageEvent { amount: 30.5 }, Arc::clone(&tank)).await);
        assert_approx_eq!(tank.get::<Health>().unwrap().current, 69.5);

        assert_ok!(ctx.schedule(DamageEvent { amount: 500.0 }, Arc::clone(&tank)).await);
        assert_approx_eq!(tank.get::<Health>().unwrap().current, 0.0);
    }

    #[tokio::test]
    async fn test_negative_damage_is_rejected() {
        let engine = engine();
        let space = engine.spaces().get(9).unwrap();
        let tank = spawn_tank(&space, engine.ids(), 1, 100.0, None).unwrap();
        let ctx = engine.context(space, None);

        let result = ctx.schedule(DamageEvent { amount: -5.0 }, Arc::clone(&tank)).await;
        assert!(result.is_err());
        assert_approx_eq!(tank.get::<Health>().unwrap().current, 100.0);
    }

    #[test]
    fn test_tank_node_requires_battle_group() {
        let tank = GameObject::new(3, 1300, "TankTemplate");
        tank.add(Health {
            current: 1.0,
            max: 1.0,
        })
        .unwrap();
        let tank = Arc::new(tank);
        assert!(TankNode::adapt(&tank).is_err());
    }
}
