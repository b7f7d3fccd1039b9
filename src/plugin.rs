use bevy::prelude::*;
use bevy_rapier3d::prelude::*;

use crate::abilities::{AbilityEvent, AbilityInput, AbilityMovement};
use crate::config::MovementTuning;
use crate::geometry::rapier::RapierRayCaster;
use crate::geometry::ActorId;
use crate::movement::{BaseInput, CharacterBody, CharacterMovement, TickContext};

/// Runs ability movement for every [`MovementCharacter`] on the fixed
/// timestep, tracing walls through the default Rapier context.
#[derive(Default)]
pub struct MovementPlugin {
    pub tuning: MovementTuning,
}

impl Plugin for MovementPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(MovementSettings(self.tuning.clone()))
            .add_event::<AbilityEvent>()
            .add_systems(
                FixedUpdate,
                (tick_movement, sync_transforms).chain(),
            );
    }
}

#[derive(Resource, Debug, Clone)]
pub struct MovementSettings(pub MovementTuning);

#[derive(Component, Debug, Clone)]
pub struct MovementCharacter(pub CharacterMovement<AbilityMovement>);

impl MovementCharacter {
    pub fn new(position: Vec3, tuning: &MovementTuning) -> Self {
        let body = CharacterBody::new(ActorId::default(), position, &tuning.base);
        Self(CharacterMovement::new(
            body,
            AbilityMovement::new(tuning.clone()),
            tuning.base.clone(),
        ))
    }
}

/// Input sampled by whatever drives the character (player or AI)
#[derive(Component, Debug, Default, Clone, Copy)]
pub struct MovementInput {
    pub base: BaseInput,
    pub abilities: AbilityInput,
    pub view_direction: Vec3,
}

fn tick_movement(
    time: Res<Time>,
    rapier: Query<&RapierContext, With<DefaultRapierContext>>,
    mut characters: Query<(Entity, &mut MovementCharacter, &MovementInput)>,
    mut events: EventWriter<AbilityEvent>,
) {
    let Ok(context) = rapier.get_single() else {
        return;
    };
    let caster = RapierRayCaster::new(context);
    let ctx = TickContext::new(time.elapsed_secs_f64(), &caster);
    let dt = time.delta_secs();

    for (entity, mut character, input) in &mut characters {
        let movement = &mut character.0;
        movement.body.actor = ActorId::from(entity);
        if input.view_direction != Vec3::ZERO {
            movement.body.view_direction = input.view_direction;
        }
        movement.input = input.base;
        movement.extension.apply_input(&movement.body, &ctx, input.abilities);
        movement.perform_movement(&ctx, dt);
        events.send_batch(movement.extension.drain_events());
    }
}

fn sync_transforms(mut characters: Query<(&MovementCharacter, &mut Transform)>) {
    for (character, mut transform) in &mut characters {
        transform.translation = character.0.body.position;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_registers_settings() {
        let mut app = App::new();
        app.add_plugins(MovementPlugin::default());
        assert!(app.world().get_resource::<MovementSettings>().is_some());
    }

    #[test]
    fn test_character_component_starts_falling() {
        let character = MovementCharacter::new(Vec3::new(0.0, 3.0, 0.0), &MovementTuning::default());
        assert!(character.0.body.is_falling());
        assert_eq!(character.0.body.position, Vec3::new(0.0, 3.0, 0.0));
    }
}
