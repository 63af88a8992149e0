//! End-to-end engine scenarios: full games driven through `apply`, the
//! documented edge cases, and a randomized invariant sweep.

use hexhaven_core::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;

fn seats(n: usize) -> Vec<PlayerSeat> {
    let names = ["Alice", "Bob", "Cara", "Dev"];
    (0..n)
        .map(|i| PlayerSeat {
            user_id: format!("user-{i}"),
            username: names[i].to_string(),
            color: PlayerColor::ALL[i],
        })
        .collect()
}

fn new_game(n: usize, seed: u64) -> (GameState, StdRng) {
    let mut rng = StdRng::seed_from_u64(seed);
    let game = GameState::new(
        format!("game-{seed}"),
        "QUARRY".into(),
        seats(n),
        1_700_000_000_000,
        &mut rng,
    );
    (game, rng)
}

fn complete_order_roll(game: &mut GameState) {
    let n = game.players.len() as u8;
    for seat in 0..n {
        game.roll_for_order_with(seat, 6 - seat, 6 - seat).unwrap();
    }
}

fn first_legal_settlement(game: &GameState, player: PlayerId) -> VertexId {
    game.board
        .tiles()
        .iter()
        .flat_map(|t| t.coord.vertices())
        .find(|v| game.board.settlement_placement_legal(v, player, true))
        .expect("a legal setup spot exists")
}

fn complete_setup(game: &mut GameState) {
    while matches!(game.phase, Phase::SetupFirst | Phase::SetupSecond) {
        let player = game.current_player_id();
        let vertex = first_legal_settlement(game, player);
        game.place_setup_settlement(player, vertex).unwrap();
        let edge = vertex
            .edges()
            .into_iter()
            .find(|e| game.board.is_board_edge(e) && game.board.road_at(e).is_none())
            .unwrap();
        game.place_setup_road(player, edge).unwrap();
    }
    assert_eq!(game.phase, Phase::Playing);
}

fn playing_game(n: usize, seed: u64) -> (GameState, StdRng) {
    let (mut game, rng) = new_game(n, seed);
    complete_order_roll(&mut game);
    complete_setup(&mut game);
    (game, rng)
}

/// Drain the bank so that hand surgery keeps every resource conserved.
fn rebalance_bank(game: &mut GameState) {
    for r in Resource::ALL {
        let held: u32 = game.players.iter().map(|p| p.resources.get(r)).sum();
        while game.bank.available(r) + held > 19 {
            assert!(game.bank.withdraw(r, 1), "bank drained past conservation");
        }
    }
}

/// Place a settlement by surgery, keeping the player's lists and public
/// score consistent so invariants stay checkable.
fn grant_settlement(game: &mut GameState, player: PlayerId, vertex: VertexId) {
    game.board.place_settlement(vertex, player);
    game.players[player as usize].settlements.push(vertex);
    game.players[player as usize].public_victory_points += 1;
}

fn grant_city(game: &mut GameState, player: PlayerId, vertex: VertexId) {
    grant_settlement(game, player, vertex);
    game.board.upgrade_to_city(vertex, player);
    game.players[player as usize].settlements.retain(|v| *v != vertex);
    game.players[player as usize].cities.push(vertex);
    game.players[player as usize].public_victory_points += 1;
}

/// Two non-adjacent unbuilt corners of a tile with the given token; parks
/// the robber on the twin tile so only this one produces.
fn isolated_tile(game: &mut GameState, token: u8) -> Option<(HexTile, VertexId, VertexId)> {
    let tile = game
        .board
        .tiles()
        .iter()
        .find(|t| {
            t.number_token == Some(token)
                && t.coord
                    .vertices()
                    .iter()
                    .all(|v| game.board.building_at(v).is_none())
        })
        .cloned()?;
    let corners: Vec<VertexId> = tile
        .coord
        .vertices()
        .into_iter()
        .filter(|v| game.board.satisfies_distance_rule(v))
        .collect();
    let first = *corners.first()?;
    let second = corners
        .iter()
        .copied()
        .find(|v| *v != first && !first.adjacent_vertices().contains(v))?;
    if let Some(twin) = game
        .board
        .tiles()
        .iter()
        .find(|t| t.number_token == Some(token) && t.id != tile.id)
    {
        game.board.move_robber(twin.id);
    }
    Some((tile, first, second))
}

/// Connected run of free coastal edges, in angular order.
fn coastal_chain(game: &GameState, offset: usize, len: usize) -> Vec<EdgeId> {
    let land: Vec<AxialCoord> = game.board.tiles().iter().map(|t| t.coord).collect();
    let mut coastal: Vec<EdgeId> = BTreeSet::from_iter(
        land.iter()
            .flat_map(|c| c.edges())
            .filter(|e| e.hexes().iter().filter(|h| land.contains(h)).count() == 1),
    )
    .into_iter()
    .collect();
    coastal.sort_by(|x, y| x.angle_degrees().partial_cmp(&y.angle_degrees()).unwrap());
    coastal.into_iter().cycle().skip(offset).take(len).collect()
}

fn grant_roads(game: &mut GameState, player: PlayerId, edges: &[EdgeId]) {
    for e in edges {
        game.board.place_road(*e, player);
        game.players[player as usize].roads.push(*e);
    }
}

fn grant_dev_card(game: &mut GameState, player: PlayerId, kind: DevCardKind) {
    let id = 900 + game.players[player as usize].dev_cards.len() as u32;
    game.players[player as usize].dev_cards.push(DevCard {
        id,
        kind,
        purchased_on_turn: 0,
        played: false,
    });
    // Keep the 25-card conservation intact.
    game.deck.pop();
    game.dev_card_deck_count -= 1;
}

// ---- S1: balanced roll ----

#[test]
fn s1_roll_distributes_one_per_settlement_two_per_city() {
    for token in [8u8, 6, 9] {
        let (mut game, _) = playing_game(2, 101);
        let Some((tile, v1, v2)) = isolated_tile(&mut game, token) else {
            continue;
        };
        let resource = tile.terrain.resource().unwrap();
        let a = game.turn_order[0];
        let b = game.turn_order[1];
        grant_settlement(&mut game, a, v1);
        grant_city(&mut game, b, v2);
        game.check_invariants().unwrap();

        let a_before = game.players[a as usize].resources.get(resource);
        let b_before = game.players[b as usize].resources.get(resource);
        let events = game
            .roll_dice_with(a, token - token / 2, token / 2)
            .unwrap();

        assert_eq!(
            game.players[a as usize].resources.get(resource),
            a_before + 1,
            "settlement earns one"
        );
        assert_eq!(
            game.players[b as usize].resources.get(resource),
            b_before + 2,
            "city earns two"
        );
        assert_eq!(game.turn_phase, TurnPhase::Main);
        assert!(events
            .iter()
            .any(|e| matches!(e, GameEvent::ResourcesDistributed { .. })));
        game.check_invariants().unwrap();
        return;
    }
    panic!("no isolated producing tile found on the tested tokens");
}

// ---- S2: seven with discard, robber, steal ----

#[test]
fn s2_seven_forces_discard_then_robber_then_steal() {
    let (mut game, mut rng) = playing_game(2, 102);
    let a = game.current_player_id();
    let b = game.turn_order[1];

    game.players[a as usize].resources = ResourceCount::with_amounts(3, 3, 2, 0, 0);
    game.players[b as usize].resources = ResourceCount::with_amounts(1, 1, 1, 1, 0);
    rebalance_bank(&mut game);
    game.check_invariants().unwrap();

    let events = game.roll_dice_with(a, 2, 5).unwrap();
    assert_eq!(game.turn_phase, TurnPhase::Discard);
    assert_eq!(
        game.pending_discards,
        vec![PendingDiscard { player: a, count: 4 }]
    );
    assert!(events
        .iter()
        .any(|e| matches!(e, GameEvent::DiscardRequired { .. })));

    game.apply(
        a,
        GameAction::DiscardResources(ResourceCount::with_amounts(2, 2, 0, 0, 0)),
        &mut rng,
    )
    .unwrap();
    assert_eq!(
        game.players[a as usize].resources,
        ResourceCount::with_amounts(1, 1, 2, 0, 0)
    );
    assert_eq!(game.turn_phase, TurnPhase::RobberMove);

    // Move onto a tile where B has a building, then steal.
    let target = game
        .board
        .tiles()
        .iter()
        .map(|t| t.id)
        .find(|id| {
            *id != game.board.robber_hex() && game.board.players_adjacent_to_hex(id).contains(&b)
        })
        .unwrap();
    game.apply(a, GameAction::MoveRobber(target), &mut rng)
        .unwrap();
    assert_eq!(game.turn_phase, TurnPhase::RobberSteal);

    let a_total = game.players[a as usize].resources.total();
    let b_total = game.players[b as usize].resources.total();
    let events = game
        .apply(a, GameAction::StealResource { victim: b }, &mut rng)
        .unwrap();
    assert!(matches!(
        events[0],
        GameEvent::ResourceStolen {
            resource: Some(_),
            ..
        }
    ));
    assert_eq!(game.players[a as usize].resources.total(), a_total + 1);
    assert_eq!(game.players[b as usize].resources.total(), b_total - 1);
    assert_eq!(game.turn_phase, TurnPhase::Main);
    game.check_invariants().unwrap();
}

#[test]
fn hand_of_exactly_seven_never_discards() {
    let (mut game, _) = playing_game(2, 103);
    let a = game.current_player_id();
    game.players[a as usize].resources = ResourceCount::with_amounts(2, 2, 1, 1, 1);
    rebalance_bank(&mut game);

    game.roll_dice_with(a, 3, 4).unwrap();
    assert!(game.pending_discards.is_empty());
    assert_eq!(game.turn_phase, TurnPhase::RobberMove);
}

#[test]
fn stealing_from_an_empty_hand_moves_nothing() {
    let (mut game, mut rng) = playing_game(2, 104);
    let a = game.current_player_id();
    let b = game.turn_order[1];
    // Empty every hand, then roll a seven.
    for p in 0..game.players.len() {
        let held = game.players[p].resources;
        game.bank.deposit_all(&held);
        game.players[p].resources = ResourceCount::new();
    }
    game.roll_dice_with(a, 1, 6).unwrap();

    let target = game
        .board
        .tiles()
        .iter()
        .map(|t| t.id)
        .find(|id| {
            *id != game.board.robber_hex() && game.board.players_adjacent_to_hex(id).contains(&b)
        })
        .unwrap();
    game.apply(a, GameAction::MoveRobber(target), &mut rng)
        .unwrap();
    let events = game
        .apply(a, GameAction::StealResource { victim: b }, &mut rng)
        .unwrap();
    assert!(matches!(
        events[0],
        GameEvent::ResourceStolen { resource: None, .. }
    ));
    assert_eq!(game.players[a as usize].resources.total(), 0);
    game.check_invariants().unwrap();
}

// ---- S3: distance rule ----

#[test]
fn s3_settlement_next_to_opponent_is_rejected_without_side_effects() {
    let (mut game, mut rng) = playing_game(2, 105);
    let a = game.current_player_id();
    let b = game.turn_order[1];

    // A vertex adjacent to one of B's settlements.
    let b_settlement = game.players[b as usize].settlements[0];
    let target = b_settlement
        .adjacent_vertices()
        .into_iter()
        .find(|v| game.board.building_at(v).is_none() && game.board.is_board_vertex(v))
        .unwrap();

    game.roll_dice_with(a, 1, 1).unwrap();
    game.players[a as usize].resources = ResourceCount::with_amounts(1, 1, 0, 1, 1);
    rebalance_bank(&mut game);

    let before = serde_json::to_string(&game).unwrap();
    let result = game.apply(a, GameAction::BuildSettlement(target), &mut rng);
    assert!(matches!(result, Err(EngineError::IllegalPlacement(_))));
    assert_eq!(serde_json::to_string(&game).unwrap(), before, "state untouched");
}

// ---- S4: longest road transfer ----

#[test]
fn s4_longest_road_transfers_on_strict_excess() {
    let (mut game, mut rng) = playing_game(2, 106);
    let a = game.current_player_id();
    let b = game.turn_order[1];

    // B owns a five-chain along the coast; a build by A triggers the
    // recompute that grants it.
    let b_chain = coastal_chain(&game, 12, 5);
    grant_roads(&mut game, b, &b_chain);
    game.roll_dice_with(a, 1, 1).unwrap();
    game.players[a as usize].resources = ResourceCount::with_amounts(2, 2, 0, 0, 0);
    rebalance_bank(&mut game);
    let near_home = game
        .board
        .tiles()
        .iter()
        .flat_map(|t| t.coord.edges())
        .find(|e| game.board.road_placement_legal(e, a))
        .unwrap();
    game.apply(a, GameAction::BuildRoad(near_home), &mut rng)
        .unwrap();
    assert_eq!(game.longest_road_holder, Some(b));
    assert!(game.players[b as usize].has_longest_road);
    let vp_a = game.players[a as usize].public_victory_points;
    let vp_b = game.players[b as usize].public_victory_points;

    // A six-chain beats it; the last segment goes through the engine.
    let a_chain = coastal_chain(&game, 0, 5);
    grant_roads(&mut game, a, &a_chain);
    let sixth = coastal_chain(&game, 5, 1)[0];
    let events = game.apply(a, GameAction::BuildRoad(sixth), &mut rng).unwrap();

    assert_eq!(game.longest_road_holder, Some(a));
    assert_eq!(game.players[a as usize].public_victory_points, vp_a + 2);
    assert_eq!(game.players[b as usize].public_victory_points, vp_b - 2);
    assert!(events.iter().any(|e| matches!(
        e,
        GameEvent::LongestRoadChanged {
            previous: Some(p),
            current: Some(q),
            ..
        } if *p == b && *q == a
    )));
}

// ---- S5: winner through a monopoly-funded build ----

#[test]
fn s5_monopoly_then_city_reaches_ten_points() {
    let (mut game, mut rng) = playing_game(2, 107);
    let a = game.current_player_id();
    let b = game.turn_order[1];

    // Raise A to 9 public points: 5 settlements and 2 cities.
    let mut spots: Vec<VertexId> = Vec::new();
    for tile in game.board.tiles() {
        for v in tile.coord.vertices() {
            if game.board.building_at(&v).is_none()
                && game.board.satisfies_distance_rule(&v)
                && !spots
                    .iter()
                    .any(|s| s.adjacent_vertices().contains(&v) || *s == v)
            {
                spots.push(v);
            }
            if spots.len() == 5 {
                break;
            }
        }
        if spots.len() == 5 {
            break;
        }
    }
    assert_eq!(spots.len(), 5);
    for v in &spots[..3] {
        grant_settlement(&mut game, a, *v);
    }
    for v in &spots[3..] {
        grant_city(&mut game, a, *v);
    }
    assert_eq!(game.players[a as usize].public_victory_points, 9);
    assert_eq!(game.players[a as usize].hidden_victory_points(), 0);

    // B holds the ore A needs; A holds the grain already.
    game.players[a as usize].resources = ResourceCount::with_amounts(0, 0, 0, 2, 0);
    game.players[b as usize].resources = ResourceCount::with_amounts(0, 0, 4, 0, 0);
    rebalance_bank(&mut game);
    grant_dev_card(&mut game, a, DevCardKind::Monopoly);
    game.check_invariants().unwrap();

    // Park the robber on the lone 2-token tile so the opening roll of two
    // pays nobody and the ore count stays exact.
    let two_tile = game
        .board
        .tiles()
        .iter()
        .find(|t| t.number_token == Some(2))
        .unwrap()
        .id;
    game.board.move_robber(two_tile);

    game.roll_dice_with(a, 1, 1).unwrap();
    let events = game
        .apply(a, GameAction::PlayMonopoly(Resource::Ore), &mut rng)
        .unwrap();
    assert!(matches!(
        events[0],
        GameEvent::DevCardPlayed {
            total_taken: Some(4),
            ..
        }
    ));
    assert_eq!(game.players[a as usize].resources.get(Resource::Ore), 4);
    assert!(game.winner.is_none());

    let settlement = game.players[a as usize].settlements[0];
    let events = game
        .apply(a, GameAction::BuildCity(settlement), &mut rng)
        .unwrap();
    assert_eq!(game.winner, Some(a));
    assert_eq!(game.status, GameStatus::Finished);
    assert_eq!(game.phase, Phase::Finished);
    assert!(events.iter().any(|e| matches!(
        e,
        GameEvent::GameWon {
            player,
            victory_points: 10,
        } if *player == a
    )));

    // Nothing more is accepted.
    assert_eq!(
        game.apply(a, GameAction::EndTurn, &mut rng),
        Err(EngineError::GameFinished)
    );
}

// ---- serialization ----

#[test]
fn game_state_serialization_round_trips_bitwise() {
    let (mut game, _) = playing_game(3, 108);
    let a = game.current_player_id();
    game.roll_dice_with(a, 1, 2).unwrap();

    let first = serde_json::to_string(&game).unwrap();
    let back: GameState = serde_json::from_str(&first).unwrap();
    let second = serde_json::to_string(&back).unwrap();
    assert_eq!(first, second);
}

// ---- randomized sweep ----

/// Drive random games through the public action surface and verify the
/// structural invariants after every successful command.
#[test]
fn random_games_preserve_invariants() {
    for seed in 0..6u64 {
        let n = 2 + (seed % 3) as usize;
        let (mut game, mut rng) = playing_game(n, 200 + seed);
        game.check_invariants().unwrap();

        let mut steps = 0;
        while !game.is_finished() && steps < 400 {
            steps += 1;
            let player = game.current_player_id();
            let action = match game.turn_phase {
                TurnPhase::PreRoll => GameAction::RollDice,
                TurnPhase::Discard => {
                    let debt = game.pending_discards[0].clone();
                    let mut hand = game.players[debt.player as usize].resources;
                    let mut discard = ResourceCount::new();
                    let mut left = debt.count;
                    for r in Resource::ALL {
                        let take = hand.get(r).min(left);
                        discard.add(r, take);
                        hand.set(r, hand.get(r) - take);
                        left -= take;
                        if left == 0 {
                            break;
                        }
                    }
                    let result = game.apply(
                        debt.player,
                        GameAction::DiscardResources(discard),
                        &mut rng,
                    );
                    result.unwrap();
                    game.check_invariants().unwrap();
                    continue;
                }
                TurnPhase::RobberMove => {
                    let target = game
                        .board
                        .tiles()
                        .iter()
                        .map(|t| t.id)
                        .find(|id| *id != game.board.robber_hex())
                        .unwrap();
                    GameAction::MoveRobber(target)
                }
                TurnPhase::RobberSteal => {
                    let victim = game
                        .board
                        .players_adjacent_to_hex(&game.board.robber_hex())
                        .into_iter()
                        .find(|&p| p != player)
                        .unwrap();
                    GameAction::StealResource { victim }
                }
                TurnPhase::Main => {
                    // Occasionally buy a card or build, otherwise pass.
                    let roll: u32 = rng.gen_range(0..4);
                    match roll {
                        0 => GameAction::BuyDevCard,
                        1 => {
                            let spot = game
                                .board
                                .tiles()
                                .iter()
                                .flat_map(|t| t.coord.edges())
                                .find(|e| game.board.road_placement_legal(e, player));
                            match spot {
                                Some(edge) => GameAction::BuildRoad(edge),
                                None => GameAction::EndTurn,
                            }
                        }
                        _ => GameAction::EndTurn,
                    }
                }
                _ => GameAction::EndTurn,
            };
            // Rejections are fine (cannot afford, empty deck, …); the
            // invariants must hold either way.
            let _ = game.apply(player, action, &mut rng);
            game.check_invariants().unwrap();
        }
        assert!(steps > 0);
    }
}
